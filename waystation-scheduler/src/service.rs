//! Async wrapper driving the synchronous [`Scheduler`]: a retry-timer
//! tick, a dispatch tick, and a completion channel fed by spawned
//! dispatcher calls — the same shape as `DeliveryProcessor::serve`'s
//! scan/process/cleanup timers, with the tokio runtime living in the
//! loop rather than in the scheduler object itself (§5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;

use waystation_spool::QueueFileSource;

use crate::dispatch::{DeliveryDispatcher, DeliveryLog, DeliveryReport, DestinationVerdict, FinalizeOutcome, RecipientStatus};
use crate::entities::entry::EntryLocation;
use crate::ids::{EntryId, TransportId};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub retry_check_interval: Duration,
    pub dispatch_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry_check_interval: Duration::from_secs(1),
            dispatch_interval: Duration::from_millis(200),
        }
    }
}

struct Completion {
    entry: EntryId,
    report: DeliveryReport,
}

/// Runs the event loop until `shutdown` fires, then returns the scheduler
/// so the caller can inspect final state (tests) or drop it (the
/// reference binary).
///
/// Ingestion is not driven by this loop; callers admit messages through
/// [`Scheduler::ingest`] before calling `run`, or from another task
/// holding a channel into one — the core scheduler has no internal
/// concurrency, so only one task may ever hold it at a time.
pub async fn run(
    mut scheduler: Scheduler,
    source: Arc<dyn QueueFileSource>,
    dispatcher: Arc<dyn DeliveryDispatcher>,
    log: Arc<dyn DeliveryLog>,
    transports: Vec<TransportId>,
    config: ServiceConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Scheduler {
    let (tx, mut rx) = mpsc::channel::<Completion>(1024);

    let mut retry_timer = interval(config.retry_check_interval);
    let mut dispatch_timer = interval(config.dispatch_interval);
    retry_timer.tick().await;
    dispatch_timer.tick().await;

    loop {
        tokio::select! {
            _ = retry_timer.tick() => {
                scheduler.run_retry_timers(Instant::now());
            }
            _ = dispatch_timer.tick() => {
                dispatch_ready_entries(&mut scheduler, &dispatcher, &transports, &tx);
            }
            Some(completion) = rx.recv() => {
                apply_completion(&mut scheduler, &*source, &log, completion).await;
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }

    scheduler
}

fn dispatch_ready_entries(
    scheduler: &mut Scheduler,
    dispatcher: &Arc<dyn DeliveryDispatcher>,
    transports: &[TransportId],
    tx: &mpsc::Sender<Completion>,
) {
    for &transport_id in transports {
        while let Some(entry_id) = scheduler.scan_transport(transport_id) {
            scheduler.mark_dispatched(entry_id);

            let entry = scheduler.entry(entry_id);
            let queue = scheduler.queue(entry.queue);
            let transport = scheduler.transport(transport_id);
            let message = scheduler.message(entry.message);

            let dispatcher = Arc::clone(dispatcher);
            let tx = tx.clone();
            let queue_id = message.queue_id;
            let sender = Arc::clone(&message.sender);
            let destination = queue.name.clone();
            let recipients = entry.recipients.clone();
            let transport_name = transport.name.clone();

            tokio::spawn(async move {
                let report = dispatcher
                    .dispatch(queue_id, &sender, &destination, &recipients, &transport_name)
                    .await;
                let _ = tx.send(Completion { entry: entry_id, report }).await;
            });
        }
    }
}

async fn apply_completion(
    scheduler: &mut Scheduler,
    source: &dyn QueueFileSource,
    log: &Arc<dyn DeliveryLog>,
    completion: Completion,
) {
    let entry_id = completion.entry;
    let (queue_id, message_id, transport_id) = {
        let entry = scheduler.entry(entry_id);
        (entry.queue, entry.message, scheduler.job(entry.job).transport)
    };
    let message_queue_id = scheduler.message(message_id).queue_id;
    let corrupt = scheduler.message(message_id).corrupt;

    for (recipient, status) in &completion.report.statuses {
        match status {
            RecipientStatus::Ok => {}
            RecipientStatus::Defer => {
                log.log_defer(message_queue_id, recipient, "worker reported defer").await;
            }
            RecipientStatus::Bounce => {
                log.log_bounce(message_queue_id, recipient, "worker reported bounce").await;
            }
        }
    }

    match completion.report.verdict {
        Some(DestinationVerdict::Dead) => scheduler.throttle(queue_id),
        Some(DestinationVerdict::Alive) if scheduler.queue(queue_id).is_dead() => {
            scheduler.unthrottle(queue_id);
        }
        Some(DestinationVerdict::Alive) | None => {}
    }

    scheduler.clear_dispatched(entry_id);
    scheduler.done(entry_id, EntryLocation::Busy);

    if scheduler.contains_message(message_id) {
        // `move_limits`, run as part of `done`, may have just raised this
        // message's budget; if the queue file isn't fully read yet, pull
        // the next batch so the new headroom turns into entries instead
        // of sitting unused until some other event nudges the scheduler.
        let message = scheduler.message(message_id);
        if !message.fully_read() && message.rcpt_count < message.rcpt_limit {
            if let Err(error) = scheduler.read_more(source, message_id, transport_id).await {
                tracing::error!(%message_queue_id, %error, "failed to read more recipients");
            }
        }
    } else {
        let outcome = if corrupt {
            FinalizeOutcome::Corrupt
        } else {
            FinalizeOutcome::Sent
        };
        log.finalize(message_queue_id, outcome).await;
    }
}
