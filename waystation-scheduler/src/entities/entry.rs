//! Entries: one message's recipients bound for one destination queue.

use waystation_common::Recipient;

use crate::arena::{Link, ListHead};
use crate::ids::{DestId, EntryId, JobId, MessageId, PeerId};

/// A convenience alias: every intrusive list of entries in this crate
/// (a peer's todo entries, a queue's todo/busy lists) is a `ListHead<EntryId>`.
pub type EntryList = ListHead<EntryId>;

/// Which of a destination queue's two lists an entry currently lives on.
/// `done` takes this explicitly so a caller's stale belief about an
/// entry's location is caught rather than silently corrupting the wrong
/// list (§4.2, §8 boundary behavior).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLocation {
    Todo,
    Busy,
}

/// One delivery unit. Lives on exactly one of `{todo, busy}` of its
/// destination queue and, while on todo, on its peer's entry list too —
/// hence the two independent `Link<EntryId>` fields.
#[derive(Debug)]
pub struct Entry {
    pub peer: PeerId,
    pub queue: DestId,
    pub job: JobId,
    pub message: MessageId,
    pub recipients: Vec<Recipient>,
    pub location: EntryLocation,
    /// Set while a worker has been handed this entry and has not yet
    /// acknowledged every recipient. `done` panics if this is still true.
    pub dispatched: bool,
    pub peer_link: Link<EntryId>,
    pub queue_link: Link<EntryId>,
}

impl Entry {
    pub fn new(
        peer: PeerId,
        queue: DestId,
        job: JobId,
        message: MessageId,
        recipients: Vec<Recipient>,
    ) -> Self {
        Self {
            peer,
            queue,
            job,
            message,
            recipients,
            location: EntryLocation::Todo,
            dispatched: false,
            peer_link: Link::default(),
            queue_link: Link::default(),
        }
    }

    pub fn peer_link(&self) -> Link<EntryId> {
        self.peer_link
    }

    pub fn set_peer_link(&mut self, link: Link<EntryId>) {
        self.peer_link = link;
    }

    pub fn queue_link(&self) -> Link<EntryId> {
        self.queue_link
    }

    pub fn set_queue_link(&mut self, link: Link<EntryId>) {
        self.queue_link = link;
    }
}
