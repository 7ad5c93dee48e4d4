//! The top-level scheduler: arenas for every entity, the selection policy,
//! entry lifecycle (`create`/`select`/`unselect`/`done`), and the
//! recipient-slot borrowing protocol (`move_limits`).
//!
//! The scheduler is plain, synchronous, single-threaded state — `&mut
//! self` methods, no interior locking, no `Send`/`Sync` bound required of
//! `Scheduler` itself (§5). Ingestion touches the async `QueueFileSource`
//! collaborator, so those methods are `async fn`s that hold `&mut self`
//! across an `await`; that's fine as long as nobody spawns the scheduler
//! across threads, which `service::run` never does.

use std::collections::HashMap;
use std::time::Instant;

use waystation_common::{Destination, Recipient};
use waystation_spool::QueueFileSource;
use waystation_tracing::traced;

use crate::arena::{pop_front, push_back, push_front, remove, Arena};
use crate::backoff;
use crate::config::SchedulerConfig;
use crate::entities::entry::{Entry, EntryLocation};
use crate::entities::{DestQueue, Job, Message, Peer, Transport};
use crate::error::{Result, SchedulerError};
use crate::ids::{DestId, EntryId, JobId, MessageId, PeerId, TransportId};

/// The scheduler's complete in-memory model: one arena per entity type,
/// plus the lookup tables used to find-or-create entities by name and the
/// two process-wide counters §5 calls out as the only shared state.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,

    entries: Arena<Entry, EntryId>,
    peers: Arena<Peer, PeerId>,
    jobs: Arena<Job, JobId>,
    messages: Arena<Message, MessageId>,
    queues: Arena<DestQueue, DestId>,
    transports: Arena<Transport, TransportId>,

    transport_by_name: HashMap<String, TransportId>,
    queue_by_name: HashMap<(TransportId, Destination), DestId>,
    peer_by_job_and_queue: HashMap<(JobId, DestId), PeerId>,
    job_by_message_and_transport: HashMap<(MessageId, TransportId), JobId>,
    message_by_queue_id: HashMap<waystation_spool::QueueId, MessageId>,

    /// `qmgr_recipient_count`: recipients currently occupying an entry
    /// slot, summed over every live message.
    qmgr_recipient_count: usize,
    in_core_queue_count: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            entries: Arena::new(),
            peers: Arena::new(),
            jobs: Arena::new(),
            messages: Arena::new(),
            queues: Arena::new(),
            transports: Arena::new(),
            transport_by_name: HashMap::new(),
            queue_by_name: HashMap::new(),
            peer_by_job_and_queue: HashMap::new(),
            job_by_message_and_transport: HashMap::new(),
            message_by_queue_id: HashMap::new(),
            qmgr_recipient_count: 0,
            in_core_queue_count: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub const fn qmgr_recipient_count(&self) -> usize {
        self.qmgr_recipient_count
    }

    #[must_use]
    pub const fn in_core_queue_count(&self) -> usize {
        self.in_core_queue_count
    }

    #[must_use]
    pub fn message(&self, id: MessageId) -> &Message {
        self.messages.get(id)
    }

    #[must_use]
    pub fn contains_message(&self, id: MessageId) -> bool {
        self.messages.contains(id)
    }

    #[must_use]
    pub fn job(&self, id: JobId) -> &Job {
        self.jobs.get(id)
    }

    #[must_use]
    pub fn peer(&self, id: PeerId) -> &Peer {
        self.peers.get(id)
    }

    #[must_use]
    pub fn queue(&self, id: DestId) -> &DestQueue {
        self.queues.get(id)
    }

    #[must_use]
    pub fn transport(&self, id: TransportId) -> &Transport {
        self.transports.get(id)
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> &Entry {
        self.entries.get(id)
    }

    // ---- find-or-create -------------------------------------------------

    pub fn ensure_transport(&mut self, name: &str) -> TransportId {
        if let Some(&id) = self.transport_by_name.get(name) {
            return id;
        }
        let transport = Transport::new(
            name.to_string(),
            self.config.default_process_limit,
            self.config.default_destination_concurrency_limit,
            self.config.default_destination_recipient_limit,
        );
        let id = self.transports.insert(transport);
        self.transport_by_name.insert(name.to_string(), id);
        id
    }

    pub fn ensure_queue(&mut self, transport_id: TransportId, name: Destination) -> DestId {
        let key = (transport_id, name.clone());
        if let Some(&id) = self.queue_by_name.get(&key) {
            return id;
        }
        let window = self.transports.get(transport_id).default_window;
        let id = self.queues.insert(DestQueue::new(transport_id, name, window));
        self.queue_by_name.insert(key, id);
        self.in_core_queue_count += 1;
        id
    }

    pub fn ensure_job(&mut self, message_id: MessageId, transport_id: TransportId) -> JobId {
        let key = (message_id, transport_id);
        if let Some(&id) = self.job_by_message_and_transport.get(&key) {
            return id;
        }

        let donated = {
            let message = self.messages.get(message_id);
            let already_donated: usize = message
                .jobs
                .iter()
                .map(|&j| self.jobs.get(j).rcpt_limit)
                .sum();
            message.rcpt_limit.saturating_sub(already_donated)
        };

        let mut job = Job::new(message_id, transport_id);
        job.rcpt_limit = donated;
        let job_id = self.jobs.insert(job);

        push_back(
            &mut self.jobs,
            &mut self.transports.get_mut(transport_id).job_list,
            job_id,
            |j| j.transport_link,
            |j, l| j.transport_link = l,
        );
        if self.transports.get(transport_id).job_current.is_none() {
            self.transports.get_mut(transport_id).job_current = Some(job_id);
        }

        let message = self.messages.get_mut(message_id);
        message.jobs.push(job_id);
        message.refcount += 1;

        self.job_by_message_and_transport.insert(key, job_id);
        job_id
    }

    pub fn ensure_peer(&mut self, job_id: JobId, queue_id: DestId) -> PeerId {
        let key = (job_id, queue_id);
        if let Some(&id) = self.peer_by_job_and_queue.get(&key) {
            return id;
        }
        let peer_id = self.peers.insert(Peer::new(job_id, queue_id));
        self.jobs.get_mut(job_id).peers.push(peer_id);
        self.peer_by_job_and_queue.insert(key, peer_id);
        peer_id
    }

    // ---- entry lifecycle (§4.2) ------------------------------------------

    /// # Panics
    ///
    /// Panics if the peer's destination queue is dead. Callers must check
    /// `queue(id).can_accept()` or route recipients through
    /// [`Self::ingest`], which defers them instead of calling this
    /// directly against a dead queue.
    #[traced(instrument(level = tracing::Level::TRACE, skip(self, recipients), fields(peer = ?peer_id)), timing(precision = "us"))]
    pub fn create_entry(&mut self, peer_id: PeerId, recipients: Vec<Recipient>) -> EntryId {
        let peer = self.peers.get(peer_id);
        let queue_id = peer.queue;
        let job_id = peer.job;
        let message_id = self.jobs.get(job_id).message;

        assert!(
            !self.queues.get(queue_id).is_dead(),
            "create_entry: destination queue is dead"
        );

        let count = recipients.len();
        let entry_id = self
            .entries
            .insert(Entry::new(peer_id, queue_id, job_id, message_id, recipients));

        push_back(
            &mut self.entries,
            &mut self.peers.get_mut(peer_id).entries,
            entry_id,
            Entry::peer_link,
            Entry::set_peer_link,
        );
        self.peers.get_mut(peer_id).refcount += 1;

        push_back(
            &mut self.entries,
            &mut self.queues.get_mut(queue_id).todo,
            entry_id,
            Entry::queue_link,
            Entry::set_queue_link,
        );

        let message = self.messages.get_mut(message_id);
        message.refcount += 1;
        message.rcpt_count += count;

        self.jobs.get_mut(job_id).rcpt_count += count;
        self.qmgr_recipient_count += count;

        entry_id
    }

    /// Pops the head of `peer`'s todo-entry list, moves it from the
    /// queue's todo list to busy, and returns it for dispatch. `None` if
    /// the peer has no todo entries.
    #[traced(instrument(level = tracing::Level::TRACE, skip(self), fields(peer = ?peer_id), ret), timing(precision = "us"))]
    pub fn select(&mut self, peer_id: PeerId) -> Option<EntryId> {
        let entry_id = pop_front(
            &mut self.entries,
            &mut self.peers.get_mut(peer_id).entries,
            Entry::peer_link,
            Entry::set_peer_link,
        )?;

        let queue_id = self.entries.get(entry_id).queue;
        remove(
            &mut self.entries,
            &mut self.queues.get_mut(queue_id).todo,
            entry_id,
            Entry::queue_link,
            Entry::set_queue_link,
        );
        push_back(
            &mut self.entries,
            &mut self.queues.get_mut(queue_id).busy,
            entry_id,
            Entry::queue_link,
            Entry::set_queue_link,
        );
        self.entries.get_mut(entry_id).location = EntryLocation::Busy;

        let job_id = self.entries.get(entry_id).job;
        self.jobs.get_mut(job_id).selected_entries += 1;

        Some(entry_id)
    }

    /// The inverse of `select`, restoring both lists to the exact
    /// position `select` took the entry from (the idempotence Law, §8).
    pub fn unselect(&mut self, entry_id: EntryId) {
        let (queue_id, peer_id) = {
            let entry = self.entries.get(entry_id);
            assert!(
                entry.location == EntryLocation::Busy,
                "unselect: entry is not on the busy list"
            );
            (entry.queue, entry.peer)
        };

        remove(
            &mut self.entries,
            &mut self.queues.get_mut(queue_id).busy,
            entry_id,
            Entry::queue_link,
            Entry::set_queue_link,
        );
        push_front(
            &mut self.entries,
            &mut self.queues.get_mut(queue_id).todo,
            entry_id,
            Entry::queue_link,
            Entry::set_queue_link,
        );
        push_front(
            &mut self.entries,
            &mut self.peers.get_mut(peer_id).entries,
            entry_id,
            Entry::peer_link,
            Entry::set_peer_link,
        );
        self.entries.get_mut(entry_id).location = EntryLocation::Todo;

        let job_id = self.entries.get(entry_id).job;
        self.jobs.get_mut(job_id).selected_entries -= 1;
    }

    /// Marks an entry as handed to a worker; `done` refuses to run while
    /// this is set (§4.2 step 1, "panic if ... the entry still holds an
    /// open stream").
    pub fn mark_dispatched(&mut self, entry_id: EntryId) {
        self.entries.get_mut(entry_id).dispatched = true;
    }

    pub fn clear_dispatched(&mut self, entry_id: EntryId) {
        self.entries.get_mut(entry_id).dispatched = false;
    }

    /// Retires an entry: unlinks it from its lists, runs the accounting
    /// and slot-borrowing refund, and recycles any peer/queue/job/message
    /// whose refcount has dropped to zero (§4.2 step 2-7).
    ///
    /// # Panics
    ///
    /// Panics if `which` does not match the entry's actual list, or if
    /// the entry is still dispatched (§8 boundary behavior, scenario S6).
    #[traced(instrument(level = tracing::Level::TRACE, skip(self), fields(entry = ?entry_id, which = ?which)), timing(precision = "us"))]
    pub fn done(&mut self, entry_id: EntryId, which: EntryLocation) {
        let (peer_id, queue_id, job_id, message_id, count) = {
            let entry = self.entries.get(entry_id);
            assert!(
                entry.location == which,
                "done: entry {entry_id:?} is on {:?}, not {which:?}",
                entry.location
            );
            assert!(
                !entry.dispatched,
                "done: entry {entry_id:?} still has an open stream"
            );
            (
                entry.peer,
                entry.queue,
                entry.job,
                entry.message,
                entry.recipients.len(),
            )
        };

        match which {
            EntryLocation::Todo => {
                remove(
                    &mut self.entries,
                    &mut self.peers.get_mut(peer_id).entries,
                    entry_id,
                    Entry::peer_link,
                    Entry::set_peer_link,
                );
                remove(
                    &mut self.entries,
                    &mut self.queues.get_mut(queue_id).todo,
                    entry_id,
                    Entry::queue_link,
                    Entry::set_queue_link,
                );
                // The base specification observes that upstream bumps
                // `selected_entries` here too and asks that the behavior
                // be preserved rather than "fixed" without knowing intent.
                self.jobs.get_mut(job_id).selected_entries += 1;
            }
            EntryLocation::Busy => {
                remove(
                    &mut self.entries,
                    &mut self.queues.get_mut(queue_id).busy,
                    entry_id,
                    Entry::queue_link,
                    Entry::set_queue_link,
                );
            }
        }
        self.entries.remove(entry_id);

        // step 2: accounting
        self.jobs.get_mut(job_id).rcpt_count -= count;
        {
            let message = self.messages.get_mut(message_id);
            message.rcpt_count -= count;
            message.rcpt_done += count;
        }
        self.qmgr_recipient_count -= count;

        // step 3: slot-borrowing refund
        let sponsor_ids: Vec<JobId> = self.messages.get(message_id).jobs.clone();
        let message_fully_read = self.messages.get(message_id).fully_read();
        for sponsor_id in sponsor_ids {
            if sponsor_id == job_id {
                continue;
            }
            if !self.jobs.contains(sponsor_id) {
                continue;
            }
            let sponsor = self.jobs.get(sponsor_id);
            let eligible = sponsor.rcpt_count < sponsor.rcpt_limit
                && (sponsor.is_retired() || message_fully_read);
            if eligible {
                self.move_limits(sponsor_id);
                self.try_retire_job(sponsor_id);
            }
        }
        if message_fully_read && self.jobs.contains(job_id) {
            self.move_limits(job_id);
        }

        // step 4: blocker rescan. Either the queue regained capacity with
        // work still waiting, or it just went to window == 0 (throttled
        // while entries were still busy on it) — both mean a scan that
        // skipped this queue at the current tag should revisit it.
        let transport_id = self.queues.get(queue_id).transport;
        let tag = self.transports.get(transport_id).blocker_tag;
        let queue = self.queues.get(queue_id);
        let newly_unblocked = queue.blocker_tag == tag
            && ((queue.window > queue.busy_refcount() && !queue.todo.is_empty()) || queue.window == 0);
        if newly_unblocked {
            self.transports.get_mut(transport_id).bump_blocker_tag();
        }

        // step 5: peer refcount
        let peer_refcount = {
            let peer = self.peers.get_mut(peer_id);
            peer.refcount -= 1;
            peer.refcount
        };
        if peer_refcount == 0 {
            let peer = self.peers.remove(peer_id);
            self.peer_by_job_and_queue.remove(&(peer.job, peer.queue));
            self.jobs.get_mut(job_id).peers.retain(|&p| p != peer_id);
        }

        // step 6: queue cleanup
        if self.queues.get(queue_id).is_empty() {
            if self.queues.get(queue_id).is_dead() {
                self.maybe_recycle_dead_queue(queue_id);
            } else {
                self.destroy_queue(queue_id);
            }
        }

        // step 7 (part): a job that drained to zero while retiring is
        // destroyed here, which contributes one more message refcount
        // decrement on top of the entry's own.
        self.try_retire_job(job_id);

        // step 7: message refcount, for the entry itself
        let message_refcount = {
            let message = self.messages.get_mut(message_id);
            message.refcount -= 1;
            message.refcount
        };
        if message_refcount == 0 {
            self.retire_message(message_id);
        }
    }

    fn try_retire_job(&mut self, job_id: JobId) -> bool {
        if !self.jobs.contains(job_id) {
            return false;
        }
        let job = self.jobs.get(job_id);
        if job.rcpt_count != 0 || !(job.retiring || job.is_retired()) {
            return false;
        }
        let transport_id = job.transport;
        let message_id = job.message;

        // Unlink from the transport's job list before removing the job
        // from its arena: `remove` needs to read the node's link, which
        // only exists while the node is still live.
        remove(
            &mut self.jobs,
            &mut self.transports.get_mut(transport_id).job_list,
            job_id,
            |j| j.transport_link,
            |j, l| j.transport_link = l,
        );
        self.jobs.remove(job_id);

        self.job_by_message_and_transport
            .remove(&(message_id, transport_id));
        if self.messages.contains(message_id) {
            let message = self.messages.get_mut(message_id);
            message.jobs.retain(|&j| j != job_id);
            message.refcount -= 1;
        }

        let transport = self.transports.get_mut(transport_id);
        if transport.job_current == Some(job_id) {
            transport.job_current = transport.job_list.head;
        }
        true
    }

    fn destroy_queue(&mut self, queue_id: DestId) {
        let queue = self.queues.remove(queue_id);
        self.queue_by_name.remove(&(queue.transport, queue.name));
        self.in_core_queue_count -= 1;
    }

    fn maybe_recycle_dead_queue(&mut self, queue_id: DestId) {
        if self.in_core_queue_count > self.config.max_in_core_queues() {
            // Destroy wins over a pending retry timer (§9 open question):
            // an over-full in-core queue table is a worse outcome than
            // losing this destination's back-off memory early.
            self.destroy_queue(queue_id);
        }
    }

    fn retire_message(&mut self, message_id: MessageId) {
        let message = self.messages.remove(message_id);
        self.message_by_queue_id.remove(&message.queue_id);
    }

    // ---- slot borrowing (§4.4) -------------------------------------------

    /// Attempts to raise `job`'s `rcpt_limit`, first reclaiming slack from
    /// idle peer jobs on the same transport's job list, then awarding from
    /// global headroom.
    #[traced(instrument(level = tracing::Level::TRACE, skip(self), fields(job = ?job_id)), timing(precision = "us"))]
    pub fn move_limits(&mut self, job_id: JobId) {
        let message_id = self.jobs.get(job_id).message;
        let message_fully_read = self.messages.get(message_id).fully_read();
        let transport_id = self.jobs.get(job_id).transport;

        // Step 2 walks peer jobs on the same transport's job list, not the
        // message's own job list: a job's slack is reclaimable once its
        // own message is fully read or it is retired, regardless of which
        // message it belongs to.
        let peer_job_ids: Vec<JobId> = {
            let transport = self.transports.get(transport_id);
            let mut ids = Vec::new();
            let mut cursor = transport.job_list.head;
            while let Some(id) = cursor {
                ids.push(id);
                cursor = self.jobs.get(id).transport_link.next;
            }
            ids
        };
        let mut touched_messages = std::collections::HashSet::new();
        for sibling_id in peer_job_ids {
            if sibling_id == job_id {
                continue;
            }
            let sibling = self.jobs.get(sibling_id);
            let sibling_message_fully_read = self.messages.get(sibling.message).fully_read();
            let eligible = sibling.is_retired() || sibling_message_fully_read;
            if eligible {
                let sibling_message_id = sibling.message;
                let sibling = self.jobs.get_mut(sibling_id);
                sibling.rcpt_limit = sibling.rcpt_count;
                touched_messages.insert(sibling_message_id);
            }
        }

        let headroom = self
            .config
            .qmgr_message_recipient_limit
            .saturating_sub(self.qmgr_recipient_count);
        let remaining_need = self.messages.get(message_id).remaining_need();
        let per_entry_cap = {
            let transport_id = self.jobs.get(job_id).transport;
            self.transports.get(transport_id).default_recipient_limit
        };

        let job = self.jobs.get_mut(job_id);
        let slack = job.rcpt_limit.saturating_sub(job.rcpt_count);
        let wanted = remaining_need.saturating_sub(slack).min(per_entry_cap);
        let award = headroom.min(wanted);
        job.rcpt_limit += award;

        if message_fully_read {
            let job = self.jobs.get_mut(job_id);
            if job.rcpt_count == 0 {
                job.stack_level = -1;
            } else {
                job.retiring = true;
            }
        }

        // `message.rcpt_limit` is the sum of what its jobs have been
        // awarded; the sibling reclaim above may have shrunk a job
        // belonging to a different message than `job`'s own, and the
        // award just changed `job`'s own message too. Resync every
        // message touched so the ingester's headroom calculation
        // (`read_more`) sees a consistent value.
        touched_messages.insert(message_id);
        for touched_id in touched_messages {
            if !self.messages.contains(touched_id) {
                continue;
            }
            let total: usize = self
                .messages
                .get(touched_id)
                .jobs
                .iter()
                .filter(|&&j| self.jobs.contains(j))
                .map(|&j| self.jobs.get(j).rcpt_limit)
                .sum();
            self.messages.get_mut(touched_id).rcpt_limit = total;
        }
    }

    // ---- selection policy (§4.3) ------------------------------------------

    /// Scans one transport starting at its current cursor, looking for
    /// the first job/peer pair with a selectable destination queue.
    /// Advances cursors and stamps blocker tags on queues that block a
    /// job for the remainder of this scan.
    pub fn scan_transport(&mut self, transport_id: TransportId) -> Option<EntryId> {
        let job_ids: Vec<JobId> = {
            let transport = self.transports.get(transport_id);
            let mut ids = Vec::new();
            let mut cursor = transport.job_current.or(transport.job_list.head);
            let start = cursor;
            while let Some(id) = cursor {
                ids.push(id);
                cursor = self.jobs.get(id).transport_link.next.or(transport.job_list.head);
                if cursor == start {
                    break;
                }
            }
            ids
        };

        for job_id in job_ids {
            if let Some(entry_id) = self.scan_job(job_id) {
                let transport = self.transports.get_mut(transport_id);
                transport.job_current = self.jobs.get(job_id).transport_link.next;
                return Some(entry_id);
            }
        }
        None
    }

    fn scan_job(&mut self, job_id: JobId) -> Option<EntryId> {
        // A job blocked on its own recipient budget rather than on
        // destination capacity gets one opportunistic `move_limits` call
        // per scan, so headroom another job just released is picked up
        // without waiting for that job's own `done()` to run.
        if !self.jobs.get(job_id).is_selectable() {
            self.move_limits(job_id);
        }
        if !self.jobs.get(job_id).is_selectable() {
            return None;
        }
        let transport_id = self.jobs.get(job_id).transport;
        let tag = self.transports.get(transport_id).blocker_tag;

        let peers = self.jobs.get(job_id).peers.clone();
        if peers.is_empty() {
            return None;
        }
        let start = self.jobs.get(job_id).peer_cursor % peers.len();

        for offset in 0..peers.len() {
            let idx = (start + offset) % peers.len();
            let peer_id = peers[idx];
            let queue_id = self.peers.get(peer_id).queue;
            let queue = self.queues.get(queue_id);
            if queue.blocker_tag == tag && tag != 0 {
                continue;
            }
            if queue.can_accept() && !self.peers.get(peer_id).entries.is_empty() {
                self.jobs.get_mut(job_id).peer_cursor = (idx + 1) % peers.len();
                return self.select(peer_id);
            }
            if !queue.can_accept() {
                self.queues.get_mut(queue_id).blocker_tag = tag;
            }
        }
        None
    }

    // ---- throttling (§4.1) -------------------------------------------------

    pub fn throttle(&mut self, queue_id: DestId) {
        let queue = self.queues.get_mut(queue_id);
        queue.previous_window = if queue.window == 0 {
            queue.previous_window
        } else {
            queue.window
        };
        queue.window = 0;
        queue.consecutive_throttles += 1;
        let consecutive = queue.consecutive_throttles;
        queue.retry_at = Some(backoff::next_retry(
            consecutive,
            std::time::Duration::from_secs(self.config.minimal_backoff_time),
            std::time::Duration::from_secs(self.config.maximal_backoff_time),
            self.config.backoff_jitter_factor,
        ));
        tracing::debug!(?queue_id, consecutive, "destination queue throttled");
    }

    pub fn unthrottle(&mut self, queue_id: DestId) {
        let queue = self.queues.get_mut(queue_id);
        queue.window = queue.previous_window;
        queue.consecutive_throttles = 0;
        queue.retry_at = None;
        tracing::debug!(?queue_id, window = queue.window, "destination queue unthrottled");

        let transport_id = queue.transport;
        if queue.blocker_tag == self.transports.get(transport_id).blocker_tag {
            self.transports.get_mut(transport_id).bump_blocker_tag();
        }
    }

    /// Unthrottles every dead queue whose retry deadline has passed.
    /// Called once per scheduler tick by the event loop.
    pub fn run_retry_timers(&mut self, now: Instant) {
        let due: Vec<DestId> = self
            .queues
            .iter()
            .filter(|(_, q)| q.is_dead() && q.retry_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id)
            .collect();
        for queue_id in due {
            self.unthrottle(queue_id);
        }
    }

    // ---- ingestion (§4.5) ---------------------------------------------------

    /// Admits a message already registered with `source` and reads as
    /// many initial recipients as the message's starting budget allows.
    pub async fn ingest(
        &mut self,
        source: &dyn QueueFileSource,
        queue_id: waystation_spool::QueueId,
        transport_name: &str,
    ) -> Result<MessageId> {
        if self.messages.len() >= self.config.qmgr_message_active_limit {
            return Err(SchedulerError::MessageLimitReached(self.messages.len()));
        }

        let sender = source
            .sender(queue_id)
            .await
            .map_err(SchedulerError::Spool)?;
        let total = source
            .total_recipients(queue_id)
            .await
            .map_err(SchedulerError::Spool)?;

        let mut message = Message::new(queue_id, sender, total);
        message.rcpt_limit = self.initial_message_limit();
        let message_id = self.messages.insert(message);
        self.message_by_queue_id.insert(queue_id, message_id);

        let transport_id = self.ensure_transport(transport_name);
        self.read_more(source, message_id, transport_id).await?;

        Ok(message_id)
    }

    fn initial_message_limit(&self) -> usize {
        let headroom = self
            .config
            .qmgr_message_recipient_limit
            .saturating_sub(self.qmgr_recipient_count);
        headroom.min(self.config.default_destination_recipient_limit)
    }

    /// Reads recipient batches from `source` until the message's current
    /// budget is exhausted or the file is fully read, turning each batch
    /// into entries (§4.5). Called from `ingest` and again whenever
    /// `move_limits` raises a message's budget after it was not fully
    /// read (scenario S5).
    pub async fn read_more(
        &mut self,
        source: &dyn QueueFileSource,
        message_id: MessageId,
        transport_id: TransportId,
    ) -> Result<()> {
        let job_id = self.ensure_job(message_id, transport_id);
        loop {
            let (queue_id, offset, headroom, done_reading) = {
                let message = self.messages.get(message_id);
                (
                    message.queue_id,
                    message.rcpt_offset,
                    message.rcpt_limit.saturating_sub(message.rcpt_count),
                    message.fully_read(),
                )
            };
            if done_reading || headroom == 0 {
                break;
            }

            let batch = source
                .next_batch(queue_id, offset, headroom)
                .await
                .map_err(SchedulerError::Spool)?;
            let read_count = batch.recipients.len();
            self.messages
                .get_mut(message_id)
                .record_read(batch.next_offset);
            if read_count == 0 {
                break;
            }
            self.create_entries_for_recipients(message_id, transport_id, job_id, batch.recipients);
        }
        Ok(())
    }

    fn create_entries_for_recipients(
        &mut self,
        message_id: MessageId,
        transport_id: TransportId,
        job_id: JobId,
        recipients: Vec<Recipient>,
    ) {
        let mut groups: HashMap<Destination, Vec<Recipient>> = HashMap::new();
        for recipient in recipients {
            groups
                .entry(recipient.domain_destination())
                .or_default()
                .push(recipient);
        }

        let recipient_limit = self.transports.get(transport_id).default_recipient_limit;
        for (destination, batch) in groups {
            let queue_id = self.ensure_queue(transport_id, destination);
            if self.queues.get(queue_id).is_dead() {
                tracing::debug!(?queue_id, "deferring recipients to a dead destination queue");
                continue;
            }
            let peer_id = self.ensure_peer(job_id, queue_id);
            for chunk in batch.chunks(recipient_limit.max(1)) {
                let job = self.jobs.get(job_id);
                if job.rcpt_count >= job.rcpt_limit {
                    break;
                }
                self.create_entry(peer_id, chunk.to_vec());
            }
        }
    }

    // ---- debug-only invariant checks (§8) --------------------------------

    /// Checks P1, P2 and P4. Panics on violation. Cheap enough to call after
    /// every top-level step in a debug build; not wired into release builds.
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        let queue_total: usize = self
            .queues
            .iter()
            .map(|(_, q)| q.todo_refcount() + q.busy_refcount())
            .sum();
        let job_total: usize = self
            .jobs
            .iter()
            .map(|(_, j)| j.peers.iter().map(|&p| self.peers.get(p).refcount).sum::<usize>())
            .sum();
        assert_eq!(
            queue_total, job_total,
            "P1: queue entry totals diverged from job-owned entry totals"
        );

        for (id, queue) in self.queues.iter() {
            assert!(
                queue.is_dead() || queue.busy_refcount() <= queue.window,
                "P2: queue {id:?} over its window ({} > {})",
                queue.busy_refcount(),
                queue.window
            );
        }

        let message_total: usize = self.messages.iter().map(|(_, m)| m.rcpt_count).sum();
        assert_eq!(
            self.qmgr_recipient_count, message_total,
            "P4: qmgr_recipient_count diverged from the sum of message rcpt_count"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waystation_common::Destination;

    fn single_window_config() -> SchedulerConfig {
        SchedulerConfig {
            default_destination_concurrency_limit: 1,
            default_destination_recipient_limit: 50,
            qmgr_message_recipient_limit: 20_000,
            ..SchedulerConfig::default()
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient::new(format!("user{i}@dest.example"), i as u64))
            .collect()
    }

    struct Wired {
        scheduler: Scheduler,
        peer_id: PeerId,
        message_id: MessageId,
        job_id: JobId,
        queue_id: DestId,
    }

    fn wire_one_peer(config: SchedulerConfig, total_recipients: usize) -> Wired {
        let mut scheduler = Scheduler::new(config);
        let transport_id = scheduler.ensure_transport("smtp");
        let queue_id = scheduler.ensure_queue(transport_id, Destination::new("dest.example"));

        let message_id = scheduler.messages.insert(Message::new(
            waystation_spool::QueueId::generate(),
            std::sync::Arc::from("sender@example.com"),
            total_recipients,
        ));
        {
            let message = scheduler.messages.get_mut(message_id);
            message.rcpt_limit = total_recipients;
            // Models a message whose whole recipient list fit in one batch,
            // so `fully_read` holds from the start without a real ingester.
            message.record_read(0);
        }

        let job_id = scheduler.ensure_job(message_id, transport_id);
        let peer_id = scheduler.ensure_peer(job_id, queue_id);

        Wired {
            scheduler,
            peer_id,
            message_id,
            job_id,
            queue_id,
        }
    }

    #[test]
    fn create_entry_rejects_a_dead_queue() {
        let mut wired = wire_one_peer(single_window_config(), 1);
        wired.scheduler.throttle(wired.queue_id);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            wired.scheduler.create_entry(wired.peer_id, recipients(1));
        }));
        assert!(result.is_err(), "create_entry on a dead queue should panic");
    }

    #[test]
    fn select_moves_an_entry_from_todo_to_busy() {
        let mut wired = wire_one_peer(single_window_config(), 1);
        wired.scheduler.create_entry(wired.peer_id, recipients(1));
        assert_eq!(wired.scheduler.queue(wired.queue_id).todo_refcount(), 1);

        let entry_id = wired.scheduler.select(wired.peer_id).unwrap();
        assert_eq!(wired.scheduler.queue(wired.queue_id).todo_refcount(), 0);
        assert_eq!(wired.scheduler.queue(wired.queue_id).busy_refcount(), 1);
        assert_eq!(wired.scheduler.entry(entry_id).location, EntryLocation::Busy);
        wired.scheduler.check_invariants();
    }

    #[test]
    fn unselect_restores_list_order_bit_identically() {
        let mut wired = wire_one_peer(single_window_config(), 3);
        let ids: Vec<_> = (0..3)
            .map(|_| wired.scheduler.create_entry(wired.peer_id, recipients(1)))
            .collect();

        let selected = wired.scheduler.select(wired.peer_id).unwrap();
        assert_eq!(selected, ids[0]);
        wired.scheduler.unselect(selected);

        // Idempotence Law: selecting again must hand back the very same
        // entry, in the very same position, as the first time.
        let reselected = wired.scheduler.select(wired.peer_id).unwrap();
        assert_eq!(reselected, ids[0]);
        assert_eq!(wired.scheduler.entry(reselected).location, EntryLocation::Busy);
        wired.scheduler.check_invariants();
    }

    #[test]
    fn create_then_done_on_every_entry_returns_counters_to_baseline() {
        let mut wired = wire_one_peer(
            SchedulerConfig {
                default_destination_concurrency_limit: 10,
                ..SchedulerConfig::default()
            },
            5,
        );
        let baseline_qmgr = wired.scheduler.qmgr_recipient_count();

        let ids: Vec<_> = (0..5)
            .map(|_| wired.scheduler.create_entry(wired.peer_id, recipients(1)))
            .collect();
        assert_eq!(wired.scheduler.qmgr_recipient_count(), baseline_qmgr + 5);

        for entry_id in ids {
            wired.scheduler.select(wired.peer_id);
            wired.scheduler.done(entry_id, EntryLocation::Busy);
        }

        assert_eq!(wired.scheduler.qmgr_recipient_count(), baseline_qmgr);
        assert!(!wired.scheduler.contains_message(wired.message_id));
    }

    #[test]
    #[should_panic(expected = "is on")]
    fn done_with_the_wrong_location_panics() {
        let mut wired = wire_one_peer(single_window_config(), 1);
        let entry_id = wired.scheduler.create_entry(wired.peer_id, recipients(1));
        wired.scheduler.select(wired.peer_id);
        wired.scheduler.done(entry_id, EntryLocation::Todo);
    }

    #[test]
    #[should_panic(expected = "still has an open stream")]
    fn done_while_dispatched_panics() {
        let mut wired = wire_one_peer(single_window_config(), 1);
        let entry_id = wired.scheduler.create_entry(wired.peer_id, recipients(1));
        wired.scheduler.select(wired.peer_id);
        wired.scheduler.mark_dispatched(entry_id);
        wired.scheduler.done(entry_id, EntryLocation::Busy);
    }

    #[test]
    fn job_rcpt_count_never_exceeds_its_limit_after_move_limits() {
        let mut wired = wire_one_peer(
            SchedulerConfig {
                default_destination_concurrency_limit: 10,
                qmgr_message_recipient_limit: 3,
                ..SchedulerConfig::default()
            },
            3,
        );
        wired.scheduler.messages.get_mut(wired.message_id).rcpt_limit = 3;

        for _ in 0..3 {
            wired.scheduler.create_entry(wired.peer_id, recipients(1));
        }
        wired.scheduler.move_limits(wired.job_id);

        let job = wired.scheduler.job(wired.job_id);
        assert!(job.rcpt_count <= job.rcpt_limit, "P3 violated");
    }

    #[test]
    fn blocked_queue_is_rescanned_only_after_its_tag_is_bumped() {
        // More budget than entries created, so the job's own recipient
        // limit is never the reason it's unselectable: only the queue's
        // window can be.
        let mut wired = wire_one_peer(single_window_config(), 5);
        let transport_id = wired.scheduler.queue(wired.queue_id).transport;

        let busy = wired.scheduler.create_entry(wired.peer_id, recipients(1));
        let blocked = wired.scheduler.create_entry(wired.peer_id, recipients(1));
        wired.scheduler.select(wired.peer_id);

        // The queue is at its window (1); a scan marks it as a blocker for
        // the transport's current tag.
        assert!(wired.scheduler.scan_transport(transport_id).is_none());
        let tag_when_blocked = wired.scheduler.transport(transport_id).blocker_tag;
        assert_eq!(wired.scheduler.queue(wired.queue_id).blocker_tag, tag_when_blocked);

        // Finishing the busy entry frees capacity with `blocked` still
        // waiting: that is an unblocking event, so the tag must advance.
        wired.scheduler.done(busy, EntryLocation::Busy);
        assert!(wired.scheduler.transport(transport_id).blocker_tag > tag_when_blocked);

        let reselected = wired.scheduler.scan_transport(transport_id);
        assert_eq!(reselected, Some(blocked));
    }

    #[test]
    fn qmgr_recipient_limit_zero_admits_nothing() {
        let config = SchedulerConfig {
            qmgr_message_recipient_limit: 0,
            ..single_window_config()
        };
        let wired = wire_one_peer(config, 1);
        assert_eq!(wired.scheduler.initial_message_limit(), 0);
    }
}
