//! End-to-end scenarios against the public `Scheduler` API, one per
//! scenario named in the scheduler specification's testable-properties
//! section. These drive the scheduler the way `service::run` would, but
//! call each step explicitly so the assertions can pin exact intermediate
//! state rather than racing a spawned dispatcher.

use std::time::Duration;

use waystation_common::{Destination, Recipient};
use waystation_scheduler::{EntryLocation, SchedulerConfig};
use waystation_scheduler::Scheduler;
use waystation_spool::{MemoryQueueFileSource, QueueFile, QueueFileSource, QueueId};

fn recipients_at(domain: &str, n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| Recipient::new(format!("user{i}@{domain}"), i as u64))
        .collect()
}

async fn admit(source: &MemoryQueueFileSource, recipients: Vec<Recipient>) -> QueueId {
    let id = QueueId::generate();
    source
        .admit(QueueFile::new(id, "sender@example.com", recipients))
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn s1_single_recipient_single_destination() {
    let config = SchedulerConfig {
        default_destination_concurrency_limit: 1,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config);
    let source = MemoryQueueFileSource::new();

    let queue_file_id = admit(&source, recipients_at("dest.example", 1)).await;
    let message_id = scheduler.ingest(&source, queue_file_id, "smtp").await.unwrap();

    let transport_id = scheduler.ensure_transport("smtp");
    let dest_id = scheduler.ensure_queue(transport_id, Destination::new("dest.example"));
    let job_id = scheduler.ensure_job(message_id, transport_id);
    let peer_id = scheduler.ensure_peer(job_id, dest_id);

    let entry_id = scheduler.select(peer_id).expect("one entry should be ready to select");
    assert_eq!(scheduler.queue(dest_id).busy_refcount(), 1);
    assert_eq!(scheduler.queue(dest_id).todo_refcount(), 0);

    scheduler.done(entry_id, EntryLocation::Busy);
    assert!(!scheduler.contains_message(message_id));
}

#[tokio::test]
async fn s2_large_message_starts_capped_and_grows_once_the_small_one_finishes() {
    let config = SchedulerConfig {
        default_destination_concurrency_limit: 1,
        default_destination_recipient_limit: 10,
        qmgr_message_recipient_limit: 10,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config);
    let source = MemoryQueueFileSource::new();
    let transport_id = scheduler.ensure_transport("smtp");

    let a_file = admit(&source, recipients_at("dest.example", 1)).await;
    let a_id = scheduler.ingest(&source, a_file, "smtp").await.unwrap();
    let job_a = scheduler.ensure_job(a_id, transport_id);
    assert_eq!(scheduler.job(job_a).rcpt_limit, 10, "A alone gets the whole headroom");

    let b_file = admit(&source, recipients_at("dest.example", 100)).await;
    let b_id = scheduler.ingest(&source, b_file, "smtp").await.unwrap();
    let job_b = scheduler.ensure_job(b_id, transport_id);
    assert!(
        scheduler.job(job_b).rcpt_limit <= 9,
        "B starts capped by the single slot A is already holding"
    );

    let dest_id = scheduler.ensure_queue(transport_id, Destination::new("dest.example"));
    let peer_a = scheduler.ensure_peer(job_a, dest_id);
    let entry_a = scheduler.select(peer_a).expect("A's only entry is selectable");
    scheduler.done(entry_a, EntryLocation::Busy);
    assert!(!scheduler.contains_message(a_id));

    // Nothing auto-retries B's budget; the scan is what notices B is stuck
    // under its own limit and gives `move_limits` another chance.
    scheduler.scan_transport(transport_id);
    assert_eq!(scheduler.job(job_b).rcpt_limit, 10, "B reclaims the slot A released");
}

#[tokio::test]
async fn s3_throttled_destination_keeps_its_queue_until_the_retry_timer_or_eviction() {
    let config = SchedulerConfig {
        default_destination_concurrency_limit: 1,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config);
    let source = MemoryQueueFileSource::new();

    let file_id = admit(&source, recipients_at("flaky.example", 1)).await;
    let message_id = scheduler.ingest(&source, file_id, "smtp").await.unwrap();
    let transport_id = scheduler.ensure_transport("smtp");
    let dest_id = scheduler.ensure_queue(transport_id, Destination::new("flaky.example"));
    let job_id = scheduler.ensure_job(message_id, transport_id);
    let peer_id = scheduler.ensure_peer(job_id, dest_id);

    let entry_id = scheduler.select(peer_id).unwrap();
    scheduler.throttle(dest_id);
    assert!(scheduler.queue(dest_id).is_dead());
    assert_eq!(scheduler.scan_transport(transport_id), None, "a dead queue yields nothing");

    scheduler.done(entry_id, EntryLocation::Busy);
    // The queue is now empty but stays allocated as a dead queue rather
    // than being destroyed outright: its retry timer still owns it.
    let window_before_retry = scheduler.queue(dest_id).window;
    assert_eq!(window_before_retry, 0);

    let retry_at = scheduler.queue(dest_id).retry_at.expect("throttle sets a retry deadline");
    scheduler.run_retry_timers(retry_at + Duration::from_millis(1));
    assert!(!scheduler.queue(dest_id).is_dead(), "the timer firing restores the window");
}

#[tokio::test]
async fn s4_blocked_job_is_skipped_until_the_tag_bumps_then_revisited() {
    let config = SchedulerConfig {
        default_destination_concurrency_limit: 1,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config);
    let source = MemoryQueueFileSource::new();
    let transport_id = scheduler.ensure_transport("smtp");

    // J1: a destination whose one-slot window is already full, with a
    // second entry still waiting behind it.
    let a_file = admit(&source, recipients_at("blocked.example", 1)).await;
    let a_id = scheduler.ingest(&source, a_file, "smtp").await.unwrap();
    let job_1 = scheduler.ensure_job(a_id, transport_id);
    let queue_blocked = scheduler.ensure_queue(transport_id, Destination::new("blocked.example"));
    let peer_1 = scheduler.ensure_peer(job_1, queue_blocked);
    scheduler.create_entry(peer_1, recipients_at("blocked.example", 1));

    // J2: one recipient on a destination with room.
    let b_file = admit(&source, recipients_at("open.example", 1)).await;
    let b_id = scheduler.ingest(&source, b_file, "smtp").await.unwrap();
    let job_2 = scheduler.ensure_job(b_id, transport_id);

    // J3: an admitted, empty message — a job with no peers at all.
    let c_file = admit(&source, Vec::new()).await;
    let c_id = scheduler.ingest(&source, c_file, "smtp").await.unwrap();
    let _job_3 = scheduler.ensure_job(c_id, transport_id);

    let busy_on_blocked = scheduler.select(peer_1).expect("first of J1's two entries");
    assert_eq!(scheduler.queue(queue_blocked).busy_refcount(), 1);

    let tag_before = scheduler.transport(transport_id).blocker_tag;
    let first_scan = scheduler.scan_transport(transport_id).expect("J2's entry is free to run");
    assert_eq!(
        scheduler.queue(queue_blocked).blocker_tag,
        tag_before,
        "the full queue gets marked as this tag's blocker while scanning for J1"
    );

    // Nothing new: J1 is still tagged out, J2 is drained, J3 has no peers.
    assert_eq!(scheduler.scan_transport(transport_id), None);

    scheduler.done(busy_on_blocked, EntryLocation::Busy);
    assert!(
        scheduler.transport(transport_id).blocker_tag > tag_before,
        "freeing the blocked queue's only slot with todo work left bumps the tag"
    );

    let revisited = scheduler
        .scan_transport(transport_id)
        .expect("J1 is revisited once the tag advances");
    assert_eq!(scheduler.entry(revisited).job, job_1);
    assert_eq!(scheduler.entry(first_scan).job, job_2);
}

#[tokio::test]
async fn s5_partially_read_message_streams_in_more_recipients_as_slots_free_up() {
    let config = SchedulerConfig {
        default_destination_concurrency_limit: 10,
        default_destination_recipient_limit: 2,
        qmgr_message_recipient_limit: 2,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config);
    let source = MemoryQueueFileSource::new();
    let transport_id = scheduler.ensure_transport("smtp");

    let file_id = admit(&source, recipients_at("big.example", 5)).await;
    let message_id = scheduler.ingest(&source, file_id, "smtp").await.unwrap();
    assert!(
        !scheduler.message(message_id).fully_read(),
        "only 2 of 5 recipients fit in the initial budget"
    );

    let dest_id = scheduler.ensure_queue(transport_id, Destination::new("big.example"));
    let job_id = scheduler.ensure_job(message_id, transport_id);
    let peer_id = scheduler.ensure_peer(job_id, dest_id);

    let first = scheduler.select(peer_id).expect("the first 2 recipients are one entry");
    scheduler.done(first, EntryLocation::Busy);
    assert!(scheduler.contains_message(message_id), "3 recipients remain unread");

    scheduler.move_limits(job_id);
    scheduler.read_more(&source, message_id, transport_id).await.unwrap();
    assert!(
        scheduler.message(message_id).fully_read(),
        "the remaining 3 recipients fit once move_limits grew the budget"
    );

    let mut drained = 0;
    while let Some(entry_id) = scheduler.select(peer_id) {
        drained += scheduler.entry(entry_id).recipients.len();
        scheduler.done(entry_id, EntryLocation::Busy);
    }
    assert_eq!(drained, 3);
    assert!(!scheduler.contains_message(message_id));
}

#[tokio::test]
#[should_panic(expected = "is on")]
async fn s6_done_with_the_wrong_list_fails_stop() {
    let config = SchedulerConfig {
        default_destination_concurrency_limit: 1,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config);
    let source = MemoryQueueFileSource::new();

    let file_id = admit(&source, recipients_at("dest.example", 1)).await;
    let message_id = scheduler.ingest(&source, file_id, "smtp").await.unwrap();
    let transport_id = scheduler.ensure_transport("smtp");
    let dest_id = scheduler.ensure_queue(transport_id, Destination::new("dest.example"));
    let job_id = scheduler.ensure_job(message_id, transport_id);
    let peer_id = scheduler.ensure_peer(job_id, dest_id);

    let entry_id = scheduler.select(peer_id).unwrap();
    // The entry is on BUSY; claiming it's still on TODO is a caller
    // contract violation and must fail stop rather than corrupt a list.
    scheduler.done(entry_id, EntryLocation::Todo);
}
