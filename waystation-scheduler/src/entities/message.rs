//! Messages: the in-memory reflection of one queue file.

use std::sync::Arc;

use crate::ids::JobId;

/// One admitted queue file. `rcpt_offset` follows the `QueueFileSource`
/// convention documented on [`waystation_spool::source::QueueFileSource`]:
/// `0` means "nothing left to read", whether that's because nothing has
/// been read yet or because the last batch reached the end of the file.
#[derive(Debug)]
pub struct Message {
    pub queue_id: waystation_spool::QueueId,
    pub sender: Arc<str>,
    pub refcount: usize,
    pub rcpt_offset: usize,
    /// Recipients currently occupying an entry slot (created, not yet
    /// `done`) across all of this message's jobs.
    pub rcpt_count: usize,
    /// This message's current recipient-slot budget, the sum of what its
    /// jobs have been awarded.
    pub rcpt_limit: usize,
    /// Cumulative count of recipients that have reached `done` — used by
    /// `remaining_need` so a job can never be awarded more budget than
    /// the message could ever still use.
    pub rcpt_done: usize,
    pub total_recipients: usize,
    pub jobs: Vec<JobId>,
    pub corrupt: bool,
    /// Set once the first recipient batch has been read. Needed because
    /// `rcpt_offset == 0` is itself ambiguous between "not started" and
    /// "fully read"; only this flag disambiguates the two during the
    /// brief window between message creation and the ingester's first
    /// `next_batch` call.
    started: bool,
}

impl Message {
    pub fn new(queue_id: waystation_spool::QueueId, sender: Arc<str>, total_recipients: usize) -> Self {
        Self {
            queue_id,
            sender,
            refcount: 0,
            rcpt_offset: 0,
            rcpt_count: 0,
            rcpt_limit: 0,
            rcpt_done: 0,
            total_recipients,
            jobs: Vec::new(),
            corrupt: false,
            started: false,
        }
    }

    /// Records that a recipient batch has just been read, and the new
    /// `rcpt_offset` reported by the source for it.
    pub fn record_read(&mut self, next_offset: usize) {
        self.started = true;
        self.rcpt_offset = next_offset;
    }

    /// How many more recipient slots this message could ever still need,
    /// independent of what's currently in flight. Used by `move_limits`
    /// to cap an award (§4.4 step 3).
    pub fn remaining_need(&self) -> usize {
        self.total_recipients.saturating_sub(self.rcpt_done)
    }

    /// Whether the queue file has been read to the end.
    pub fn fully_read(&self) -> bool {
        self.started && self.rcpt_offset == 0
    }
}
