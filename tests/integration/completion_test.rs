// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{clock, Harness};
use async_trait::async_trait;
use chrono::Duration;
use jobrelay::domain::models::job::EnqueueOptions;
use jobrelay::domain::models::lane::{LaneTable, DEFAULT_LANE};
use jobrelay::domain::models::parent::{ParentRef, ParentSummary, Reconciliation, StatusCounts};
use jobrelay::domain::services::completion_service::{CompletionError, ParentFinalizer};
use jobrelay::handlers::HandlerRegistry;
use jobrelay::queue::job_queue::JobQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 第一次调用失败，之后成功
#[derive(Default)]
struct FlakyFinalizer {
    calls: AtomicUsize,
}

#[async_trait]
impl ParentFinalizer for FlakyFinalizer {
    async fn finalize(&self, _summary: &ParentSummary) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("directory API unavailable");
        }
        Ok(())
    }
}

#[derive(Default)]
struct CountingFinalizer {
    calls: AtomicUsize,
}

#[async_trait]
impl ParentFinalizer for CountingFinalizer {
    async fn finalize(&self, _summary: &ParentSummary) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ok_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("x", |_job| async { Ok(()) });
    registry
}

async fn enqueue_for(harness: &Harness, parent: &ParentRef, count: usize) {
    for _ in 0..count {
        harness
            .queue
            .enqueue("x", Some(parent.clone()), Vec::new(), EnqueueOptions::default())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_parent_without_jobs_stays_open() {
    let harness = Harness::new(LaneTable::default(), HandlerRegistry::new()).await;
    let parent = ParentRef::new("newsletter", "unknown");

    let result = harness
        .tracker
        .reconcile(&parent, clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(result, Reconciliation::Open(StatusCounts::default()));

    let status = harness.queue.get_status(&parent).await.unwrap();
    assert_eq!(status.total, 0);
    assert!(!status.finalized);
}

#[tokio::test]
async fn test_open_parent_is_not_finalized() {
    let harness = Harness::new(LaneTable::default(), ok_registry()).await;
    let parent = ParentRef::new("group", "sales");
    enqueue_for(&harness, &parent, 2).await;

    let result = harness
        .tracker
        .reconcile(&parent, clock(10, 0, 0))
        .await
        .unwrap();
    match result {
        Reconciliation::Open(counts) => assert_eq!(counts.pending, 2),
        other => panic!("expected open parent, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_reconciles_finalize_once() {
    let finalizer = Arc::new(CountingFinalizer::default());
    let harness = Harness::with_finalizers(
        LaneTable::default(),
        ok_registry(),
        vec![("group", finalizer.clone() as Arc<dyn ParentFinalizer>)],
    )
    .await;
    let parent = ParentRef::new("group", "eng");
    enqueue_for(&harness, &parent, 3).await;

    // Complete the jobs without letting the dispatcher reconcile
    let claimed = harness
        .jobs
        .claim_batch("x", 10, clock(10, 0, 0), Uuid::new_v4(), Duration::minutes(15))
        .await
        .unwrap();
    for job in &claimed {
        harness
            .jobs
            .mark_completed(job.id, clock(10, 0, 0))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..5 {
        let tracker = harness.tracker.clone();
        let parent = parent.clone();
        handles.push(tokio::spawn(async move {
            tracker.reconcile(&parent, clock(10, 1, 0)).await.unwrap()
        }));
    }

    let mut finalized = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Reconciliation::Finalized(summary) => {
                finalized += 1;
                assert_eq!(summary.completed, 3);
                assert!(summary.is_clean());
            }
            Reconciliation::AlreadyFinal => {}
            Reconciliation::Open(counts) => panic!("parent still open: {:?}", counts),
        }
    }

    assert_eq!(finalized, 1);
    assert_eq!(finalizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_finalizer_is_retried() {
    let finalizer = Arc::new(FlakyFinalizer::default());
    let harness = Harness::with_finalizers(
        LaneTable::default(),
        ok_registry(),
        vec![("group", finalizer.clone() as Arc<dyn ParentFinalizer>)],
    )
    .await;
    let parent = ParentRef::new("group", "ops");
    enqueue_for(&harness, &parent, 2).await;

    // Finalizer error is logged, the tick itself succeeds
    let report = harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(report.completed, 2);
    assert!(report.finalized_parents.is_empty());
    assert!(!harness.queue.get_status(&parent).await.unwrap().finalized);

    let retried = harness
        .tracker
        .reconcile(&parent, clock(10, 5, 0))
        .await
        .unwrap();
    assert!(matches!(retried, Reconciliation::Finalized(_)));
    assert!(harness.queue.get_status(&parent).await.unwrap().finalized);

    let again = harness
        .tracker
        .reconcile(&parent, clock(10, 10, 0))
        .await
        .unwrap();
    assert_eq!(again, Reconciliation::AlreadyFinal);
    assert_eq!(finalizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_finalizer_error_is_reported_to_direct_callers() {
    let finalizer = Arc::new(FlakyFinalizer::default());
    let harness = Harness::with_finalizers(
        LaneTable::default(),
        ok_registry(),
        vec![("group", finalizer as Arc<dyn ParentFinalizer>)],
    )
    .await;
    let parent = ParentRef::new("group", "hr");
    enqueue_for(&harness, &parent, 1).await;

    let claimed = harness
        .jobs
        .claim_batch("x", 1, clock(10, 0, 0), Uuid::new_v4(), Duration::minutes(15))
        .await
        .unwrap();
    harness
        .jobs
        .mark_completed(claimed[0].id, clock(10, 0, 0))
        .await
        .unwrap();

    let err = harness
        .tracker
        .reconcile(&parent, clock(10, 1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, CompletionError::Finalizer { ref parent, .. } if parent == "group:hr"));
}

#[tokio::test]
async fn test_sweep_repairs_missed_reconciliation() {
    let finalizer = Arc::new(CountingFinalizer::default());
    let harness = Harness::with_finalizers(
        LaneTable::default(),
        ok_registry(),
        vec![("newsletter", finalizer.clone() as Arc<dyn ParentFinalizer>)],
    )
    .await;
    let done = ParentRef::new("newsletter", "1");
    let open = ParentRef::new("newsletter", "2");
    enqueue_for(&harness, &done, 2).await;

    let claimed = harness
        .jobs
        .claim_batch("x", 10, clock(10, 0, 0), Uuid::new_v4(), Duration::minutes(15))
        .await
        .unwrap();
    for job in &claimed {
        harness
            .jobs
            .mark_completed(job.id, clock(10, 0, 0))
            .await
            .unwrap();
    }
    enqueue_for(&harness, &open, 1).await;

    let finalized = harness
        .tracker
        .sweep(clock(9, 0, 0), clock(10, 30, 0))
        .await
        .unwrap();
    assert_eq!(finalized, 1);
    assert!(harness.queue.get_status(&done).await.unwrap().finalized);
    assert!(!harness.queue.get_status(&open).await.unwrap().finalized);

    let repeat = harness
        .tracker
        .sweep(clock(9, 0, 0), clock(10, 31, 0))
        .await
        .unwrap();
    assert_eq!(repeat, 0);
    assert_eq!(finalizer.calls.load(Ordering::SeqCst), 1);
}

/// 记录每次收到的汇总
#[derive(Default)]
struct RecordingFinalizer {
    summaries: Mutex<Vec<ParentSummary>>,
}

#[async_trait]
impl ParentFinalizer for RecordingFinalizer {
    async fn finalize(&self, summary: &ParentSummary) -> anyhow::Result<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_new_job_reopens_finalized_parent() {
    let finalizer = Arc::new(RecordingFinalizer::default());
    let harness = Harness::with_finalizers(
        LaneTable::default(),
        ok_registry(),
        vec![("newsletter", finalizer.clone() as Arc<dyn ParentFinalizer>)],
    )
    .await;
    let parent = ParentRef::new("newsletter", "42");
    enqueue_for(&harness, &parent, 1).await;

    let first = harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 0, 0))
        .await
        .unwrap();
    assert_eq!(first.finalized_parents, vec!["newsletter:42".to_string()]);

    // A resend adds work to the same parent
    enqueue_for(&harness, &parent, 1).await;
    let status = harness.queue.get_status(&parent).await.unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.pending, 1);
    assert!(!status.finalized);

    let second = harness
        .dispatcher
        .tick_at(DEFAULT_LANE, clock(10, 5, 0))
        .await
        .unwrap();
    assert_eq!(second.finalized_parents, vec!["newsletter:42".to_string()]);

    let status = harness.queue.get_status(&parent).await.unwrap();
    assert!(status.finalized);
    assert_eq!(status.completed, 2);

    let summaries = finalizer.summaries.lock().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].total, 1);
    assert_eq!(summaries[1].total, 2);
    assert_eq!(summaries[1].completed, 2);
}
