//! Throttle retry-delay calculation, the scheduler's equivalent of a
//! delivery retry policy: exponential backoff from `minimal_backoff_time`,
//! doubling per consecutive throttle, capped at `maximal_backoff_time`,
//! with jitter so destinations sharing a failure cause don't all retry
//! at the same instant (§4.1).

use std::time::{Duration, Instant};

use rand::Rng;

/// Computes when a destination queue throttled for the
/// `consecutive`-th consecutive time in a row should next be retried.
///
/// `consecutive` is 1 on the first throttle in a streak.
pub fn next_retry(
    consecutive: u32,
    minimal_backoff: Duration,
    maximal_backoff: Duration,
    jitter_factor: f64,
) -> Instant {
    let exponent = consecutive.saturating_sub(1);
    let base = minimal_backoff.as_secs();
    let delay_secs = if exponent >= 63 {
        maximal_backoff.as_secs()
    } else {
        base.saturating_mul(1u64 << exponent)
            .min(maximal_backoff.as_secs())
    };

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered_secs = {
        let range = delay_secs as f64 * jitter_factor;
        let jitter = rand::rng().random_range(-range..=range);
        ((delay_secs as f64) + jitter).max(0.0) as u64
    };

    Instant::now() + Duration::from_secs(jittered_secs)
}
