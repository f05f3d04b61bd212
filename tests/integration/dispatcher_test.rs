// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{clock, Harness};
use chrono::Duration as ChronoDuration;
use jobrelay::domain::models::job::{EnqueueOptions, JobStatus};
use jobrelay::domain::models::lane::{LaneConfig, LaneTable, DEFAULT_LANE};
use jobrelay::domain::models::parent::ParentRef;
use jobrelay::domain::models::payload::EmailMessage;
use jobrelay::domain::repositories::job_repository::JobRepository;
use jobrelay::handlers::{HandlerError, HandlerRegistry};
use jobrelay::queue::immediate::{ImmediateDelivery, Outcome};
use jobrelay::queue::job_queue::{Enqueued, JobQueue, JobQueueExt, QueueError};
use jobrelay::queue::scheduler::LaneScheduler;
use jobrelay::workers::manager::WorkerManager;
use jobrelay::workers::DispatchError;
use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

fn lanes(entries: Vec<(&str, LaneConfig)>) -> LaneTable {
    LaneTable::new(
        entries
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect::<HashMap<_, _>>(),
    )
}

async fn enqueue(harness: &Harness, kind: &str) -> Uuid {
    harness
        .queue
        .enqueue(kind, None, b"{}".to_vec(), EnqueueOptions::default())
        .await
        .unwrap()
        .id()
        .unwrap()
}

#[tokio::test]
async fn test_unknown_kind_fails_without_retry() {
    let harness = Harness::new(LaneTable::default(), HandlerRegistry::new()).await;
    let id = enqueue(&harness, "nobody.handles.this").await;

    let report = harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.last_error.as_deref(),
        Some("No handler registered for kind nobody.handles.this")
    );
}

#[tokio::test]
async fn test_permanent_error_is_terminal() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("email.send", |_job| async {
        Err(HandlerError::permanent("recipient address rejected"))
    });
    let harness = Harness::new(LaneTable::builtin(), registry).await;
    let id = enqueue(&harness, "email.send").await;

    let report = harness
        .dispatcher
        .tick_at("email", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_handler_timeout_is_retried() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("slow", |_job| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    });
    let harness = Harness::new(
        lanes(vec![(
            "slow",
            LaneConfig {
                handler_timeout_secs: 1,
                ..Default::default()
            }
            .with_kinds(["slow"]),
        )]),
        registry,
    )
    .await;
    let id = enqueue(&harness, "slow").await;

    let report = harness
        .dispatcher
        .tick_at("slow", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.retried, 1);

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.last_error.as_deref(), Some("Handler timed out after 1s"));
}

#[tokio::test]
async fn test_overlapping_tick_on_same_lane_is_skipped() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let mut registry = HandlerRegistry::new();
    {
        let started = started.clone();
        let release = release.clone();
        registry.register_fn("x", move |_job| {
            let started = started.clone();
            let release = release.clone();
            async move {
                started.notify_one();
                release.notified().await;
                Ok(())
            }
        });
    }
    let harness = Harness::new(
        lanes(vec![("sync", LaneConfig::default().with_kinds(["x"]))]),
        registry,
    )
    .await;
    enqueue(&harness, "x").await;

    let dispatcher = harness.dispatcher.clone();
    let first = tokio::spawn(async move { dispatcher.tick_at("sync", clock(10, 0, 0)).await });
    started.notified().await;

    let overlapping = harness
        .dispatcher
        .tick_at("sync", clock(10, 0, 1))
        .await
        .unwrap();
    assert!(overlapping.skipped);
    assert_eq!(overlapping.claimed, 0);

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(!first.skipped);
    assert_eq!(first.completed, 1);
}

#[tokio::test]
async fn test_batch_size_is_shared_across_kinds() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("a", |_job| async { Ok(()) });
    registry.register_fn("b", |_job| async { Ok(()) });
    let harness = Harness::new(
        lanes(vec![(
            "mixed",
            LaneConfig {
                batch_size: 3,
                ..Default::default()
            }
            .with_kinds(["a", "b"]),
        )]),
        registry,
    )
    .await;
    for kind in ["a", "a", "b", "b"] {
        enqueue(&harness, kind).await;
    }

    let first = harness
        .dispatcher
        .tick_at("mixed", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(first.claimed, 3);

    let second = harness
        .dispatcher
        .tick_at("mixed", clock(10, 5, 0))
        .await
        .unwrap();
    assert_eq!(second.claimed, 1);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut registry = HandlerRegistry::new();
    {
        let active = active.clone();
        let peak = peak.clone();
        registry.register_fn("x", move |_job| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }
    let harness = Harness::new(
        lanes(vec![(
            "sync",
            LaneConfig {
                concurrency: 2,
                ..Default::default()
            }
            .with_kinds(["x"]),
        )]),
        registry,
    )
    .await;
    for _ in 0..6 {
        enqueue(&harness, "x").await;
    }

    let report = harness
        .dispatcher
        .tick_at("sync", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.completed, 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_jobs_start_in_priority_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new();
    {
        let order = order.clone();
        registry.register_fn("x", move |job| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(job.priority);
                Ok(())
            }
        });
    }
    let harness = Harness::new(
        lanes(vec![(
            "sync",
            LaneConfig {
                concurrency: 1,
                ..Default::default()
            }
            .with_kinds(["x"]),
        )]),
        registry,
    )
    .await;
    for priority in [3, 1, 2] {
        harness
            .queue
            .enqueue(
                "x",
                None,
                Vec::new(),
                EnqueueOptions::default().with_priority(priority),
            )
            .await
            .unwrap();
    }

    harness
        .dispatcher
        .tick_at("sync", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_tick_all_covers_unconfigured_kinds() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("misc", |_job| async { Ok(()) });
    let harness = Harness::new(LaneTable::builtin(), registry).await;
    let id = enqueue(&harness, "misc").await;

    let reports = harness.dispatcher.tick_all_at(clock(10, 0, 0)).await.unwrap();
    let lanes: Vec<&str> = reports.iter().map(|r| r.lane.as_str()).collect();
    assert_eq!(lanes, vec!["email", "newsletter", DEFAULT_LANE]);

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.lane, DEFAULT_LANE);
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_tick_reclaims_abandoned_jobs_before_claiming() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("x", |_job| async { Ok(()) });
    let harness = Harness::new(
        lanes(vec![("sync", LaneConfig::default().with_kinds(["x"]))]),
        registry,
    )
    .await;
    let id = enqueue(&harness, "x").await;

    // Another instance claimed the job and died
    let crashed = harness
        .jobs
        .claim_batch("x", 1, clock(10, 0, 0), Uuid::new_v4(), ChronoDuration::minutes(15))
        .await
        .unwrap();
    assert_eq!(crashed.len(), 1);

    let early = harness
        .dispatcher
        .tick_at("sync", clock(10, 10, 0))
        .await
        .unwrap();
    assert_eq!(early.reclaimed, 0);
    assert_eq!(early.claimed, 0);

    let report = harness
        .dispatcher
        .tick_at("sync", clock(10, 20, 0))
        .await
        .unwrap();
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.completed, 1);

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn test_duplicate_enqueue_returns_existing_job() {
    let harness = Harness::new(LaneTable::builtin(), HandlerRegistry::new()).await;
    let parent = Some(ParentRef::new("newsletter", "42"));
    let options = EnqueueOptions::default().with_dedup_key("alice@example.com");

    let first = harness
        .queue
        .enqueue("newsletter.send", parent.clone(), Vec::new(), options.clone())
        .await
        .unwrap();
    let second = harness
        .queue
        .enqueue("newsletter.send", parent, Vec::new(), options)
        .await
        .unwrap();

    let Enqueued::Scheduled(id) = first else {
        panic!("first enqueue should schedule a job");
    };
    assert_eq!(second, Enqueued::AlreadyScheduled(Some(id)));
}

#[tokio::test]
async fn test_enqueue_validation() {
    let harness = Harness::new(LaneTable::builtin(), HandlerRegistry::new()).await;

    let empty_kind = harness
        .queue
        .enqueue("  ", None, Vec::new(), EnqueueOptions::default())
        .await;
    assert!(matches!(empty_kind, Err(QueueError::Validation(_))));

    let no_attempts = harness
        .queue
        .enqueue(
            "x",
            None,
            Vec::new(),
            EnqueueOptions::default().with_max_attempts(0),
        )
        .await;
    assert!(matches!(no_attempts, Err(QueueError::Validation(_))));
}

#[tokio::test]
async fn test_lane_defaults_apply_on_enqueue() {
    let harness = Harness::new(LaneTable::builtin(), HandlerRegistry::new()).await;
    let not_before = clock(12, 0, 0);
    let id = harness
        .queue
        .enqueue(
            "email.send",
            None,
            Vec::new(),
            EnqueueOptions::default().not_before(not_before),
        )
        .await
        .unwrap()
        .id()
        .unwrap();

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.lane, "email");
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.scheduled_at, not_before);

    let report = harness
        .dispatcher
        .tick_at("email", clock(11, 59, 0))
        .await
        .unwrap();
    assert_eq!(report.claimed, 0);
}

#[tokio::test]
async fn test_typed_handlers_receive_decoded_payloads() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new();
    {
        let received = received.clone();
        registry.register_typed::<EmailMessage, _, _>(move |email| {
            let received = received.clone();
            async move {
                received.lock().unwrap().push(email.to);
                Ok(())
            }
        });
    }
    let harness = Harness::new(LaneTable::builtin(), registry).await;

    let email = EmailMessage {
        to: "alice@example.com".to_string(),
        subject: "Welcome".to_string(),
        body: "Hello".to_string(),
        html: false,
        reply_to: None,
    };
    harness
        .queue
        .enqueue_typed(None, &email, EnqueueOptions::default())
        .await
        .unwrap();

    let report = harness
        .dispatcher
        .tick_at("email", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(*received.lock().unwrap(), vec!["alice@example.com".to_string()]);
}

#[tokio::test]
async fn test_cancelling_last_open_job_finalizes_parent() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("newsletter.send", |_job| async { Ok(()) });
    let harness = Harness::new(LaneTable::builtin(), registry).await;
    let parent = ParentRef::new("newsletter", "9");

    let sent = harness
        .queue
        .enqueue("newsletter.send", Some(parent.clone()), Vec::new(), EnqueueOptions::default())
        .await
        .unwrap()
        .id()
        .unwrap();
    let held = harness
        .queue
        .enqueue(
            "newsletter.send",
            Some(parent.clone()),
            Vec::new(),
            EnqueueOptions::default().not_before(clock(23, 0, 0)),
        )
        .await
        .unwrap()
        .id()
        .unwrap();

    harness
        .dispatcher
        .tick_at("newsletter", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(
        harness.queue.get_job(sent).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert!(!harness.queue.get_status(&parent).await.unwrap().finalized);

    assert!(harness.queue.cancel(held).await.unwrap());
    assert!(!harness.queue.cancel(held).await.unwrap());

    let status = harness.queue.get_status(&parent).await.unwrap();
    assert!(status.finalized);
    assert_eq!(status.completed, 1);
    assert_eq!(status.cancelled, 1);
}

#[tokio::test]
async fn test_immediate_delivery_outcomes() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("ok", |_job| async { Ok(()) });
    registry.register_fn("flaky", |_job| async {
        Err(HandlerError::transient("smtp 421"))
    });
    registry.register_fn("bad", |_job| async {
        Err(HandlerError::permanent("smtp 550"))
    });
    let harness = Harness::new(LaneTable::default(), registry).await;
    let immediate = ImmediateDelivery::new(
        harness.queue.clone(),
        harness.registry.clone(),
        Duration::from_secs(5),
    );

    let delivered = immediate
        .deliver_or_enqueue("ok", None, Vec::new(), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(delivered, Outcome::Delivered);

    let queued = immediate
        .deliver_or_enqueue("flaky", None, Vec::new(), EnqueueOptions::default())
        .await
        .unwrap();
    let Outcome::Queued { id: Some(id) } = queued else {
        panic!("transient failure should queue the job");
    };
    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);

    let failed = immediate
        .deliver_or_enqueue("bad", None, Vec::new(), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(
        failed,
        Outcome::Failed {
            error: "Permanent failure: smtp 550".to_string()
        }
    );

    // Only the transient failure reached the store
    assert_eq!(
        harness.jobs.pending_kinds(DEFAULT_LANE).await.unwrap(),
        vec!["flaky".to_string()]
    );
}

#[tokio::test]
async fn test_lane_scheduler_drives_ticks() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("email.send", |_job| async { Ok(()) });
    let table = lanes(vec![(
        "email",
        LaneConfig {
            tick_interval_secs: 1,
            ..Default::default()
        }
        .with_kinds(["email.send"]),
    )]);
    let harness = Harness::new(table, registry).await;
    let id = enqueue(&harness, "email.send").await;

    let mut manager = WorkerManager::new();
    manager.start_lanes(&LaneScheduler::new(harness.dispatcher.clone()));
    // email plus the implicit default lane
    assert_eq!(manager.len(), 2);

    let mut status = JobStatus::Pending;
    for _ in 0..40 {
        status = harness.queue.get_job(id).await.unwrap().unwrap().status;
        if status == JobStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    manager.shutdown();

    assert_eq!(status, JobStatus::Completed);
}

#[tokio::test]
async fn test_panicking_handler_does_not_abort_the_tick() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("boom", |job| async move {
        if job.attempts > 0 {
            panic!("template engine crashed");
        }
        Ok(())
    });
    registry.register_fn("ok", |_job| async { Ok(()) });
    let harness = Harness::new(LaneTable::default(), registry).await;
    let boom = enqueue(&harness, "boom").await;
    let ok = enqueue(&harness, "ok").await;

    let report = harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);

    let boom = harness.queue.get_job(boom).await.unwrap().unwrap();
    assert_eq!(boom.status, JobStatus::Failed);
    assert_eq!(boom.attempts, 1);
    assert_eq!(
        boom.last_error.as_deref(),
        Some("Permanent failure: handler panicked: template engine crashed")
    );
    let ok = harness.queue.get_job(ok).await.unwrap().unwrap();
    assert_eq!(ok.status, JobStatus::Completed);

    // The lane lock was released and the lane keeps ticking
    let next = harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 5, 0))
        .await
        .unwrap();
    assert!(!next.skipped);
}

#[tokio::test]
async fn test_unknown_lane_is_rejected() {
    let harness = Harness::new(LaneTable::builtin(), HandlerRegistry::new()).await;

    let err = harness
        .dispatcher
        .tick_at("no-such-lane", clock(10, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownLane(lane) if lane == "no-such-lane"));

    // default always exists even when not configured
    assert!(harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 0, 0))
        .await
        .is_ok());
}

/// 按指标名累计计数的记录器
#[derive(Default)]
struct CountingRecorder {
    counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl CountingRecorder {
    fn count(&self, name: &str) -> u64 {
        self.counts.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

struct NamedCounter {
    name: String,
    counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl CounterFn for NamedCounter {
    fn increment(&self, value: u64) {
        *self.counts.lock().unwrap().entry(self.name.clone()).or_default() += value;
    }

    fn absolute(&self, value: u64) {
        self.counts.lock().unwrap().insert(self.name.clone(), value);
    }
}

impl Recorder for CountingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(NamedCounter {
            name: key.name().to_string(),
            counts: self.counts.clone(),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

#[tokio::test]
async fn test_outcome_dropped_when_job_changed_while_running() {
    let repository: Arc<OnceLock<Arc<dyn JobRepository>>> = Arc::new(OnceLock::new());
    let mut registry = HandlerRegistry::new();
    let cell = repository.clone();
    registry.register_fn("x", move |job| {
        let cell = cell.clone();
        async move {
            // An operator fails the job while its handler is still running
            let jobs = cell.get().cloned().unwrap();
            jobs.mark_failed(job.id, "aborted by operator", chrono::Utc::now())
                .await
                .unwrap();
            Ok(())
        }
    });
    let harness = Harness::new(
        lanes(vec![("sync", LaneConfig::default().with_kinds(["x"]))]),
        registry,
    )
    .await;
    assert!(repository.set(harness.jobs.clone()).is_ok());
    let id = enqueue(&harness, "x").await;

    let recorder = CountingRecorder::default();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let report = harness
        .dispatcher
        .tick_at("sync", clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.completed, 0);

    let job = harness.queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("aborted by operator"));

    assert_eq!(recorder.count("jobs_completed_total"), 0);
    assert_eq!(recorder.count("jobs_conflicts_total"), 1);
    assert_eq!(recorder.count("dispatcher_ticks_total"), 1);
}
