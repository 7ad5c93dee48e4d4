//! Collaborator traits standing in for the delivery-agent IPC transport
//! and the bounce/defer log, the same way `empath_spool::BackingStore` is
//! injected rather than hard-wired into the spool crate.

use async_trait::async_trait;

use waystation_common::{Destination, Recipient};
use waystation_spool::QueueId;

/// Per-recipient outcome a worker reports for one dispatched entry.
pub use waystation_common::RecipientOutcome as RecipientStatus;

/// A destination-wide verdict a worker may attach to its report, used to
/// throttle or unthrottle the destination queue independently of the
/// per-recipient statuses (§6).
pub use waystation_common::DestinationVerdict;

/// One worker's report for a dispatched entry.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub statuses: Vec<(Recipient, RecipientStatus)>,
    pub verdict: Option<DestinationVerdict>,
}

/// The "dispatch and be notified of completion" contract the scheduler
/// needs from the delivery-agent transport. `dispatch` hands an entry's
/// recipients to a worker; the scheduler does not wait on it synchronously
/// — the event loop in `service` awaits completions separately.
#[async_trait]
pub trait DeliveryDispatcher: Send + Sync + std::fmt::Debug {
    async fn dispatch(
        &self,
        queue_id: QueueId,
        sender: &str,
        destination: &Destination,
        recipients: &[Recipient],
        transport: &str,
    ) -> DeliveryReport;
}

/// The bounce/defer/finalize collaborator (§4.6, §6). A production binary
/// would persist these; the reference binary only logs through `tracing`.
#[async_trait]
pub trait DeliveryLog: Send + Sync + std::fmt::Debug {
    async fn log_defer(&self, queue_id: QueueId, recipient: &Recipient, reason: &str);
    async fn log_bounce(&self, queue_id: QueueId, recipient: &Recipient, reason: &str);
    async fn finalize(&self, queue_id: QueueId, outcome: FinalizeOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Sent,
    Bounced,
    Corrupt,
}

/// A `DeliveryLog` that only emits `tracing` events, for the reference
/// binary and for tests that don't care about the log content.
#[derive(Debug, Default)]
pub struct TracingDeliveryLog;

#[async_trait]
impl DeliveryLog for TracingDeliveryLog {
    async fn log_defer(&self, queue_id: QueueId, recipient: &Recipient, reason: &str) {
        tracing::warn!(%queue_id, recipient = %recipient.address, %reason, "recipient deferred");
    }

    async fn log_bounce(&self, queue_id: QueueId, recipient: &Recipient, reason: &str) {
        tracing::error!(%queue_id, recipient = %recipient.address, %reason, "recipient bounced");
    }

    async fn finalize(&self, queue_id: QueueId, outcome: FinalizeOutcome) {
        tracing::info!(%queue_id, ?outcome, "message finalized");
    }
}
