//! Peers: the (message, destination-queue) junction.

use crate::entities::entry::EntryList;
use crate::ids::{DestId, JobId};

/// Owns the todo-side entries a single message has bound for a single
/// destination queue. Destroyed when `refcount` (entries owned, plus any
/// external hold taken while an entry of this peer is selected) hits zero.
#[derive(Debug)]
pub struct Peer {
    pub job: JobId,
    pub queue: DestId,
    pub entries: EntryList,
    pub refcount: usize,
}

impl Peer {
    pub fn new(job: JobId, queue: DestId) -> Self {
        Self {
            job,
            queue,
            entries: EntryList::default(),
            refcount: 0,
        }
    }
}
