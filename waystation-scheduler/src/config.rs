//! Scheduler configuration knobs (§6 of the scheduler specification).
//!
//! Every field follows the teacher stack's per-field `#[serde(default =
//! "...")]` convention so a partially-specified config document still
//! deserializes with sensible defaults, the same way
//! `empath-delivery`'s `RetryPolicy`/`CircuitBreakerConfig` do.

use serde::{Deserialize, Serialize};

const fn default_process_limit() -> usize {
    50
}

const fn default_destination_concurrency_limit() -> usize {
    20
}

const fn default_destination_recipient_limit() -> usize {
    50
}

const fn default_message_active_limit() -> usize {
    20_000
}

const fn default_message_recipient_limit() -> usize {
    20_000
}

const fn default_minimal_backoff_secs() -> u64 {
    300
}

const fn default_maximal_backoff_secs() -> u64 {
    4 * 3600
}

const fn default_backoff_jitter_factor() -> f64 {
    0.1
}

/// Scheduler-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-transport window (`default_process_limit`): the maximum number
    /// of concurrently busy entries summed across all of a transport's
    /// destination queues is not capped directly by this scheduler (each
    /// queue enforces its own window), but new destination queues for a
    /// transport inherit this as their initial window unless overridden.
    #[serde(default = "default_process_limit")]
    pub default_process_limit: usize,

    /// Initial window for a newly created destination queue.
    #[serde(default = "default_destination_concurrency_limit")]
    pub default_destination_concurrency_limit: usize,

    /// Maximum recipients per entry (`recipient_limit`).
    #[serde(default = "default_destination_recipient_limit")]
    pub default_destination_recipient_limit: usize,

    /// Maximum number of live messages the scheduler will admit.
    #[serde(default = "default_message_active_limit")]
    pub qmgr_message_active_limit: usize,

    /// Global recipient slot pool (`qmgr_recipient_limit`).
    #[serde(default = "default_message_recipient_limit")]
    pub qmgr_message_recipient_limit: usize,

    /// Minimum throttle retry delay, in seconds.
    #[serde(default = "default_minimal_backoff_secs")]
    pub minimal_backoff_time: u64,

    /// Maximum throttle retry delay, in seconds.
    #[serde(default = "default_maximal_backoff_secs")]
    pub maximal_backoff_time: u64,

    /// Jitter applied to throttle retry delays, as a fraction of the
    /// computed delay (e.g. `0.1` means ±10%).
    #[serde(default = "default_backoff_jitter_factor")]
    pub backoff_jitter_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_process_limit: default_process_limit(),
            default_destination_concurrency_limit: default_destination_concurrency_limit(),
            default_destination_recipient_limit: default_destination_recipient_limit(),
            qmgr_message_active_limit: default_message_active_limit(),
            qmgr_message_recipient_limit: default_message_recipient_limit(),
            minimal_backoff_time: default_minimal_backoff_secs(),
            maximal_backoff_time: default_maximal_backoff_secs(),
            backoff_jitter_factor: default_backoff_jitter_factor(),
        }
    }
}

/// The bound (§4.1) past which a dead destination queue with an empty
/// todo/busy pair is recycled rather than kept around for its retry timer.
impl SchedulerConfig {
    #[must_use]
    pub const fn max_in_core_queues(&self) -> usize {
        2 * self.qmgr_message_recipient_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_specification() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_process_limit, 50);
        assert_eq!(config.default_destination_concurrency_limit, 20);
        assert_eq!(config.default_destination_recipient_limit, 50);
        assert_eq!(config.qmgr_message_active_limit, 20_000);
        assert_eq!(config.qmgr_message_recipient_limit, 20_000);
    }

    #[test]
    fn partial_document_fills_remaining_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"default_destination_concurrency_limit": 5}"#).unwrap();
        assert_eq!(config.default_destination_concurrency_limit, 5);
        assert_eq!(config.default_process_limit, 50);
    }

    #[test]
    fn max_in_core_queues_is_twice_the_recipient_limit() {
        let config = SchedulerConfig {
            qmgr_message_recipient_limit: 100,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.max_in_core_queues(), 200);
    }
}
