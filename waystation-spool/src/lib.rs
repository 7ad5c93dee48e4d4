#![warn(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

//! Queue file identity and the recipient-streaming source the scheduler's
//! ingester reads from.
//!
//! Everything *inside* a queue file (on-disk record format, envelope
//! parsing, bounce/defer logs) is out of scope here: this crate only
//! supplies the [`QueueId`] identifier and the [`QueueFileSource`]
//! collaborator the scheduler's ingestion path (`move_limits`-driven
//! re-reads included) is written against.

pub mod error;
pub mod id;
pub mod source;

pub use error::{Result, SpoolError};
pub use id::QueueId;
pub use source::{MemoryQueueFileSource, QueueFile, QueueFileSource};
