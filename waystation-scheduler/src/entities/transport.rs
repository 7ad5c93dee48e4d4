//! Transports: round-robin job lists and the blocker-tag epoch counter.

use crate::arena::ListHead;
use crate::ids::JobId;

/// A transport's round-robin list of jobs, its current scan cursor, and
/// the odd epoch counter scans compare destination-queue blocker stamps
/// against.
#[derive(Debug)]
pub struct Transport {
    pub name: String,
    /// `default_process_limit`: the transport-wide worker budget. Not
    /// enforced as a hard per-queue cap (each destination queue enforces
    /// its own `window`); kept for parity with the configuration surface
    /// and available to a future transport-level admission check.
    pub process_limit: usize,
    /// `default_destination_concurrency_limit`: the window a newly
    /// created destination queue for this transport starts with.
    pub default_window: usize,
    /// `default_destination_recipient_limit`: the per-entry recipient cap.
    pub default_recipient_limit: usize,
    /// Always odd; 0 on a destination queue means "never stamped",
    /// distinguishable from any real epoch.
    pub blocker_tag: u64,
    pub job_list: ListHead<JobId>,
    pub job_current: Option<JobId>,
    pub candidate_cache_current: Option<JobId>,
}

impl Transport {
    pub fn new(
        name: String,
        process_limit: usize,
        default_window: usize,
        default_recipient_limit: usize,
    ) -> Self {
        Self {
            name,
            process_limit,
            default_window,
            default_recipient_limit,
            blocker_tag: 1,
            job_list: ListHead::default(),
            job_current: None,
            candidate_cache_current: None,
        }
    }

    /// Bumps the epoch by 2, keeping it odd, and invalidates the cached
    /// scan cursor (§4.2 step 4).
    pub fn bump_blocker_tag(&mut self) {
        self.blocker_tag += 2;
        self.job_current = self.job_list.head;
        self.candidate_cache_current = None;
    }
}
