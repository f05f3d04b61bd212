// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::Job;
use crate::domain::models::lane::{LaneConfig, LaneTable, DEFAULT_LANE};
use crate::domain::models::parent::{ParentRef, Reconciliation};
use crate::domain::repositories::job_repository::{JobRepository, RepositoryError};
use crate::domain::services::completion_service::CompletionTracker;
use crate::domain::services::rate_limiting_service::{RateLimiter, RateLimitingError};
use crate::handlers::{HandlerError, HandlerRegistry};
use crate::utils::retry_policy::RetryPolicy;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{stream, StreamExt, TryStreamExt};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 调度错误类型
///
/// 只有存储层错误会中止 tick，处理器错误记录在作业上
#[derive(Error, Debug)]
pub enum DispatchError {
    /// 存储不可用
    #[error("Store unavailable: {0}")]
    Store(#[from] RepositoryError),

    /// 速率限制配置或计数失败
    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] RateLimitingError),

    /// 通道未配置
    #[error("Unknown lane: {0}")]
    UnknownLane(String),
}

/// 单次 tick 的结果汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub lane: String,
    /// 同一通道已有 tick 在运行，本次未执行
    pub skipped: bool,
    pub reclaimed: u64,
    pub exhausted: u64,
    pub claimed: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    /// 状态已被其他调用方改变、结果未写入的作业数
    pub conflicts: u64,
    pub rate_limited_kinds: Vec<String>,
    pub finalized_parents: Vec<String>,
}

impl TickReport {
    fn new(lane: &str) -> Self {
        Self {
            lane: lane.to_string(),
            ..Default::default()
        }
    }

    fn skipped(lane: &str) -> Self {
        Self {
            skipped: true,
            ..Self::new(lane)
        }
    }
}

/// 单个作业的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Retried,
    Failed,
    Conflict,
}

impl JobOutcome {
    fn counter_name(self) -> &'static str {
        match self {
            JobOutcome::Completed => "jobs_completed_total",
            JobOutcome::Retried => "jobs_retried_total",
            JobOutcome::Failed => "jobs_failed_total",
            JobOutcome::Conflict => "jobs_conflicts_total",
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 本实例标识，写入作业租约
    pub instance_id: Uuid,
    /// 租约时长，超过后作业被回收
    pub lease_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            lease_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// 调度器
///
/// 每次 tick 针对一个通道：回收过期租约、按类型限流认领、
/// 有界并发执行处理器、记录结果，最后对涉及的父实体对账。
pub struct Dispatcher {
    repo: Arc<dyn JobRepository>,
    registry: Arc<HandlerRegistry>,
    rate_limiter: RateLimiter,
    tracker: Arc<CompletionTracker>,
    lanes: Arc<LaneTable>,
    config: DispatcherConfig,
    lane_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Dispatcher {
    /// 创建新的调度器实例
    ///
    /// # 参数
    ///
    /// * `repo` - 作业仓库
    /// * `registry` - 处理器注册表
    /// * `tracker` - 完成跟踪器
    /// * `lanes` - 通道配置
    /// * `config` - 调度器配置
    pub fn new(
        repo: Arc<dyn JobRepository>,
        registry: Arc<HandlerRegistry>,
        tracker: Arc<CompletionTracker>,
        lanes: Arc<LaneTable>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            rate_limiter: RateLimiter::new(repo.clone()),
            repo,
            registry,
            tracker,
            lanes,
            config,
            lane_locks: DashMap::new(),
        }
    }

    pub fn lanes(&self) -> &LaneTable {
        &self.lanes
    }

    pub fn instance_id(&self) -> Uuid {
        self.config.instance_id
    }

    /// 对通道执行一次 tick
    pub async fn tick(&self, lane: &str) -> Result<TickReport, DispatchError> {
        self.tick_at(lane, Utc::now()).await
    }

    /// 对所有通道各执行一次 tick
    pub async fn tick_all(&self) -> Result<Vec<TickReport>, DispatchError> {
        self.tick_all_at(Utc::now()).await
    }

    pub async fn tick_all_at(&self, now: DateTime<Utc>) -> Result<Vec<TickReport>, DispatchError> {
        let mut lanes = self.lanes.names();
        if !lanes.iter().any(|l| l == DEFAULT_LANE) {
            lanes.push(DEFAULT_LANE.to_string());
        }

        let mut reports = Vec::with_capacity(lanes.len());
        for lane in lanes {
            reports.push(self.tick_at(&lane, now).await?);
        }
        Ok(reports)
    }

    /// 以给定时钟对通道执行一次 tick
    ///
    /// # 参数
    ///
    /// * `lane` - 通道名
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// * `Ok(TickReport)` - 本次 tick 的汇总，同通道 tick 重叠时 `skipped` 为 true
    /// * `Err(DispatchError)` - 通道未配置，或存储不可用导致 tick 提前中止
    #[instrument(skip(self, now))]
    pub async fn tick_at(&self, lane: &str, now: DateTime<Utc>) -> Result<TickReport, DispatchError> {
        if lane != DEFAULT_LANE && !self.lanes.contains(lane) {
            return Err(DispatchError::UnknownLane(lane.to_string()));
        }

        let lock = self
            .lane_locks
            .entry(lane.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let Ok(_guard) = lock.try_lock() else {
            info!("Tick for lane {} already running, skipping", lane);
            return Ok(TickReport::skipped(lane));
        };

        counter!("dispatcher_ticks_total", "lane" => lane.to_string()).increment(1);

        let config = self.lanes.get(lane);
        let mut report = TickReport::new(lane);
        let lease = chrono::Duration::from_std(self.config.lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));

        let reclaim = self
            .repo
            .reclaim_stale_in_flight(Some(lane), lease, now)
            .await?;
        report.reclaimed = reclaim.requeued;
        report.exhausted = reclaim.exhausted;
        counter!("jobs_reclaimed_total").increment(reclaim.requeued + reclaim.exhausted);

        let mut touched: HashSet<ParentRef> = reclaim.touched_parents;
        let policy = RetryPolicy::new(config.backoff_base(), config.max_attempts);
        let mut remaining = config.batch_size;

        for kind in self.kinds_for_lane(lane, &config).await? {
            if remaining == 0 {
                break;
            }

            let allowed = self
                .rate_limiter
                .allow(&kind, config.rate_limit.as_ref(), remaining, now)
                .await?;
            if allowed == 0 {
                debug!("Kind {} is at its rate ceiling, skipping", kind);
                counter!("jobs_rate_limited_total", "kind" => kind.clone()).increment(1);
                report.rate_limited_kinds.push(kind);
                continue;
            }

            let jobs = self
                .repo
                .claim_batch(&kind, allowed, now, self.config.instance_id, lease)
                .await?;
            if jobs.is_empty() {
                continue;
            }

            let claimed = jobs.len() as u64;
            remaining = remaining.saturating_sub(claimed);
            report.claimed += claimed;
            debug!("Claimed {} {} job(s)", claimed, kind);

            // buffered keeps claim order as start order
            let outcomes: Vec<(JobOutcome, Option<ParentRef>)> = stream::iter(jobs)
                .map(|job| self.process_job(job, &config, &policy, now))
                .buffered(config.concurrency.max(1))
                .try_collect()
                .await?;

            for (outcome, parent) in outcomes {
                match outcome {
                    JobOutcome::Completed => report.completed += 1,
                    JobOutcome::Retried => report.retried += 1,
                    JobOutcome::Failed => report.failed += 1,
                    JobOutcome::Conflict => report.conflicts += 1,
                }
                if let Some(parent) = parent {
                    touched.insert(parent);
                }
            }
        }

        let mut parents: Vec<ParentRef> = touched.into_iter().collect();
        parents.sort_by_key(|p| p.to_string());
        for parent in parents {
            match self.tracker.reconcile(&parent, now).await {
                Ok(Reconciliation::Finalized(summary)) => {
                    report.finalized_parents.push(summary.parent.to_string());
                }
                Ok(_) => {}
                Err(e) => error!("Failed to reconcile parent {}: {}", parent, e),
            }
        }

        if report.claimed > 0 || report.reclaimed > 0 || report.exhausted > 0 {
            info!(
                "Lane {} tick: claimed {}, completed {}, retried {}, failed {}, reclaimed {}",
                lane,
                report.claimed,
                report.completed,
                report.retried,
                report.failed,
                report.reclaimed
            );
        }

        Ok(report)
    }

    /// 通道包含的作业类型
    ///
    /// 配置中列出的类型、映射到该通道的已注册类型，以及存储中有 pending 作业的类型
    async fn kinds_for_lane(
        &self,
        lane: &str,
        config: &LaneConfig,
    ) -> Result<Vec<String>, DispatchError> {
        let mut kinds: BTreeSet<String> = config.kinds.iter().cloned().collect();
        kinds.extend(
            self.registry
                .kinds()
                .into_iter()
                .filter(|kind| self.lanes.lane_for_kind(kind) == lane),
        );
        kinds.extend(self.repo.pending_kinds(lane).await?);
        Ok(kinds.into_iter().collect())
    }

    /// 执行单个作业并记录结果
    async fn process_job(
        &self,
        job: Job,
        config: &LaneConfig,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<(JobOutcome, Option<ParentRef>), DispatchError> {
        let result = self.execute(&job, config.handler_timeout()).await;
        let outcome = self.record_outcome(&job, result, policy, now).await?;
        Ok((outcome, job.parent_ref))
    }

    async fn execute(&self, job: &Job, timeout: Duration) -> Result<(), HandlerError> {
        debug!(
            "Running job {} ({}), attempt {}/{}",
            job.id, job.kind, job.attempts, job.max_attempts
        );
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, self.registry.dispatch(job)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(timeout.as_secs())),
        };

        histogram!("job_handler_duration_seconds", "kind" => job.kind.clone())
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn record_outcome(
        &self,
        job: &Job,
        result: Result<(), HandlerError>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome, DispatchError> {
        let (outcome, written) = match result {
            Ok(()) => (
                JobOutcome::Completed,
                self.repo.mark_completed(job.id, now).await,
            ),
            Err(e) if e.is_retryable() && RetryPolicy::should_retry(job.attempts, job.max_attempts) => {
                let attempt = u32::try_from(job.attempts).unwrap_or(1);
                let next_attempt_at = policy.next_retry_time(attempt, now);
                warn!(
                    "Job {} ({}) attempt {}/{} failed, retrying at {}: {}",
                    job.id, job.kind, job.attempts, job.max_attempts, next_attempt_at, e
                );
                (
                    JobOutcome::Retried,
                    self.repo
                        .mark_retry(job.id, next_attempt_at, &e.to_string(), now)
                        .await,
                )
            }
            Err(e) => {
                error!(
                    "Job {} ({}) failed permanently after {} attempt(s): {}",
                    job.id, job.kind, job.attempts, e
                );
                (
                    JobOutcome::Failed,
                    self.repo.mark_failed(job.id, &e.to_string(), now).await,
                )
            }
        };

        match written {
            Ok(()) => {
                counter!(outcome.counter_name(), "kind" => job.kind.clone()).increment(1);
                Ok(outcome)
            }
            Err(RepositoryError::Conflict(id)) => {
                warn!("Job {} changed state while running, outcome dropped", id);
                let outcome = JobOutcome::Conflict;
                counter!(outcome.counter_name(), "kind" => job.kind.clone()).increment(1);
                Ok(outcome)
            }
            Err(e) => Err(e.into()),
        }
    }
}
