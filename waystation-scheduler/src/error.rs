//! Typed errors for the scheduler, layered the way `empath-delivery`
//! separates permanent/temporary/system failures: recoverable conditions
//! are represented as ordinary enum variants, and programming-contract
//! violations are never represented as a `Result` variant at all — they
//! fail-stop via `panic!` at the point of violation (§7.3).

use thiserror::Error;

use crate::ids::DestId;

/// Recoverable scheduler-level errors. These never abort the process; they
/// are reported to the caller (typically the ingester or the event loop)
/// so it can log and move on.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A message's envelope could not be parsed; the message is finalized
    /// as corrupt rather than retried (§7.2).
    #[error("message {0} has a corrupt envelope: {1}")]
    CorruptMessage(waystation_spool::QueueId, String),

    /// The global active-message limit (`qmgr_message_active_limit`) would
    /// be exceeded by admitting another message.
    #[error("message active limit reached ({0} messages live)")]
    MessageLimitReached(usize),

    /// Reading the next recipient batch failed.
    #[error("queue file access failed: {0}")]
    Spool(#[from] waystation_spool::SpoolError),

    /// An `EntryId`/`PeerId`/... handed back from a previous call no
    /// longer refers to a live entity, because the caller held on to it
    /// across a `done()` that recycled it.
    #[error("destination {0} is not currently selectable (dead or at its concurrency window)")]
    DestinationNotSelectable(DestId),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
