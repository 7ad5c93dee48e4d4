pub mod destination;
pub mod error;
pub mod logging;
pub mod recipient;

pub use destination::Destination;
pub use error::ConfigError;
pub use recipient::Recipient;
pub use tracing;

/// Outcome reported back for a single recipient once a worker finishes
/// attempting delivery of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientOutcome {
    Ok,
    Defer,
    Bounce,
}

/// Destination-wide verdict a worker may attach to a completion report,
/// independent of the individual recipient outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationVerdict {
    Alive,
    Dead,
}
