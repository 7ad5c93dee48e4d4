//! Destination queues: in-memory state for one delivery destination.

use std::time::Instant;

use waystation_common::Destination;

use crate::entities::entry::EntryList;
use crate::ids::TransportId;

/// One delivery destination's todo/busy lists, concurrency window, and
/// back-off state. `window == 0` means the queue is dead (throttled); any
/// other value is the number of entries it may run busy at once.
#[derive(Debug)]
pub struct DestQueue {
    pub transport: TransportId,
    pub name: Destination,
    pub todo: EntryList,
    pub busy: EntryList,
    pub window: usize,
    /// The window to restore on `unthrottle`.
    pub previous_window: usize,
    /// Stamped with the owning transport's `blocker_tag` when a scan
    /// finds this queue unable to yield a selectable entry. Compared
    /// against the transport's current tag to short-circuit rescans.
    pub blocker_tag: u64,
    pub consecutive_throttles: u32,
    pub retry_at: Option<Instant>,
}

impl DestQueue {
    pub fn new(transport: TransportId, name: Destination, window: usize) -> Self {
        Self {
            transport,
            name,
            todo: EntryList::default(),
            busy: EntryList::default(),
            window,
            previous_window: window,
            blocker_tag: 0,
            consecutive_throttles: 0,
            retry_at: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.window == 0
    }

    pub fn todo_refcount(&self) -> usize {
        self.todo.len
    }

    pub fn busy_refcount(&self) -> usize {
        self.busy.len
    }

    pub fn is_empty(&self) -> bool {
        self.todo.is_empty() && self.busy.is_empty()
    }

    pub fn can_accept(&self) -> bool {
        !self.is_dead() && self.busy_refcount() < self.window
    }

    pub fn is_marked_blocker_at(&self, tag: u64) -> bool {
        self.blocker_tag == tag
    }
}
