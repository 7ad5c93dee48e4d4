#![warn(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

//! Wiring for the reference binary: deserializes a `waystation.config.ron`
//! document into a [`Controller`], then runs the scheduler's event loop
//! against an in-memory spool and a delivery transport that only logs,
//! handing off to `tokio::select!` once every collaborator is wired.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

use waystation_common::{internal, Destination, Recipient};
use waystation_scheduler::dispatch::TracingDeliveryLog;
use waystation_scheduler::service::{self, ServiceConfig};
use waystation_scheduler::{DeliveryDispatcher, DeliveryReport, RecipientStatus, Scheduler, SchedulerConfig};
use waystation_spool::{MemoryQueueFileSource, QueueFileSource, QueueId};

const fn default_dispatch_interval_millis() -> u64 {
    200
}

const fn default_retry_check_interval_secs() -> u64 {
    1
}

fn default_transports() -> Vec<String> {
    vec!["smtp".to_string()]
}

/// The event-loop timing knobs, deserialized in whole seconds/milliseconds
/// rather than `Duration` directly so a config document stays plain data.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_retry_check_interval_secs")]
    pub retry_check_interval_secs: u64,
    #[serde(default = "default_dispatch_interval_millis")]
    pub dispatch_interval_millis: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            retry_check_interval_secs: default_retry_check_interval_secs(),
            dispatch_interval_millis: default_dispatch_interval_millis(),
        }
    }
}

impl From<ServiceSettings> for ServiceConfig {
    fn from(settings: ServiceSettings) -> Self {
        Self {
            retry_check_interval: Duration::from_secs(settings.retry_check_interval_secs),
            dispatch_interval: Duration::from_millis(settings.dispatch_interval_millis),
        }
    }
}

/// The top-level document a `waystation.config.ron` file deserializes into.
#[derive(Debug, Clone, Deserialize)]
pub struct Controller {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub service: ServiceSettings,
    /// Named transports to stand up before entering the event loop. Each
    /// name becomes one `TransportId`; destination queues for it are
    /// created lazily as recipients for that transport are ingested.
    #[serde(default = "default_transports")]
    pub transports: Vec<String>,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            service: ServiceSettings::default(),
            transports: default_transports(),
        }
    }
}

impl Controller {
    /// Runs the scheduler until a shutdown signal (`SIGINT`/`SIGTERM`)
    /// arrives, then returns.
    ///
    /// # Errors
    ///
    /// Never currently returns an error; the `Result` return type leaves
    /// room for a future collaborator (an admission surface, a persisted
    /// spool) to fail without changing this signature.
    pub async fn run(self) -> anyhow::Result<()> {
        waystation_common::logging::init();
        internal!("waystation scheduler starting");

        let mut scheduler = Scheduler::new(self.scheduler);
        let transports = self
            .transports
            .iter()
            .map(|name| scheduler.ensure_transport(name))
            .collect::<Vec<_>>();

        let source: Arc<dyn QueueFileSource> = Arc::new(MemoryQueueFileSource::new());
        let dispatcher: Arc<dyn DeliveryDispatcher> = Arc::new(LoggingDispatcher);
        let log = Arc::new(TracingDeliveryLog);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            internal!("shutdown signal received");
            let _ = shutdown_tx.send(());
        });

        service::run(
            scheduler,
            source,
            dispatcher,
            log,
            transports,
            self.service.into(),
            shutdown_rx,
        )
        .await;

        internal!("waystation scheduler stopped");
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler, watching CTRL+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// A [`DeliveryDispatcher`] that never actually delivers anything: it
/// reports every recipient `Ok` and logs what it would have sent. Stands
/// in for the delivery-agent IPC transport, which is out of scope.
#[derive(Debug, Default)]
struct LoggingDispatcher;

#[async_trait]
impl DeliveryDispatcher for LoggingDispatcher {
    async fn dispatch(
        &self,
        queue_id: QueueId,
        sender: &str,
        destination: &Destination,
        recipients: &[Recipient],
        transport: &str,
    ) -> DeliveryReport {
        tracing::debug!(
            %queue_id,
            %sender,
            %destination,
            transport,
            recipients = recipients.len(),
            "dispatching entry to logging-only transport"
        );

        let statuses = recipients
            .iter()
            .cloned()
            .map(|recipient| (recipient, RecipientStatus::Ok))
            .collect();

        DeliveryReport {
            statuses,
            verdict: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_controller_matches_the_documented_defaults() {
        let controller = Controller::default();
        assert_eq!(controller.transports, vec!["smtp".to_string()]);
        assert_eq!(controller.service.retry_check_interval_secs, 1);
        assert_eq!(controller.scheduler.default_process_limit, 50);
    }

    #[test]
    fn partial_ron_document_fills_remaining_defaults() {
        let controller: Controller = ron::from_str("(transports: [\"smtp\", \"lmtp\"])").unwrap();
        assert_eq!(controller.transports, vec!["smtp".to_string(), "lmtp".to_string()]);
        assert_eq!(controller.service.dispatch_interval_millis, 200);
    }
}
