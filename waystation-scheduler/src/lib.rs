#![warn(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod arena;
pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod ids;
pub mod scheduler;
pub mod service;

pub use config::SchedulerConfig;
pub use dispatch::{DeliveryDispatcher, DeliveryLog, DeliveryReport, FinalizeOutcome, RecipientStatus};
pub use entities::entry::EntryLocation;
pub use error::{Result, SchedulerError};
pub use ids::{DestId, EntryId, JobId, MessageId, PeerId, TransportId};
pub use scheduler::Scheduler;
