//! Recipient records: an (address, envelope offset) pair belonging to one
//! message, immutable once created.

use serde::{Deserialize, Serialize};

use crate::destination::Destination;

/// One recipient address read from a message's envelope, together with its
/// byte offset in the queue file (so a worker can report back which record
/// a bounce/defer applies to without re-parsing the envelope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub envelope_offset: u64,
}

impl Recipient {
    #[must_use]
    pub const fn new(address: String, envelope_offset: u64) -> Self {
        Self {
            address,
            envelope_offset,
        }
    }

    /// The destination a transport resolves this recipient to, e.g. the
    /// domain part of the address. Transport-specific nexthop resolution
    /// (MX lookups, relay overrides) happens upstream of the scheduler;
    /// this is the fallback used when no such override applies.
    #[must_use]
    pub fn domain_destination(&self) -> Destination {
        self.address
            .rsplit_once('@')
            .map_or_else(|| Destination::new(self.address.as_str()), |(_, domain)| Destination::new(domain))
    }
}
