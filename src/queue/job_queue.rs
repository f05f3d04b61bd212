// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::{EnqueueOptions, Job, NewJob};
use crate::domain::models::lane::LaneTable;
use crate::domain::models::parent::{ParentRef, ParentStatus};
use crate::domain::models::payload::JobPayload;
use crate::domain::repositories::job_repository::{JobRepository, RepositoryError};
use crate::domain::services::completion_service::{CompletionError, CompletionTracker};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 对账错误
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    /// 负载无法编码
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// 入队参数无效
    #[error("Validation error: {0}")]
    Validation(String),
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "id", rename_all = "snake_case")]
pub enum Enqueued {
    /// 新作业已写入
    Scheduled(Uuid),
    /// 已有等价的未结束作业，未重复写入
    AlreadyScheduled(Option<Uuid>),
}

impl Enqueued {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Enqueued::Scheduled(id) => Some(*id),
            Enqueued::AlreadyScheduled(id) => *id,
        }
    }
}

/// 作业队列特质
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 入队作业
    ///
    /// # 参数
    ///
    /// * `kind` - 作业类型
    /// * `parent` - 所属父实体
    /// * `payload` - 负载字节
    /// * `options` - 入队选项
    ///
    /// # 返回值
    ///
    /// 去重键冲突时返回 `Enqueued::AlreadyScheduled` 而不是错误
    async fn enqueue(
        &self,
        kind: &str,
        parent: Option<ParentRef>,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<Enqueued, QueueError>;

    /// 根据ID查询作业
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    /// 查询父实体状态
    async fn get_status(&self, parent: &ParentRef) -> Result<ParentStatus, QueueError>;

    /// 取消尚未被认领的作业
    async fn cancel(&self, id: Uuid) -> Result<bool, QueueError>;
}

/// 强类型入队扩展
#[async_trait]
pub trait JobQueueExt: JobQueue {
    /// 以 `P::KIND` 为类型入队强类型负载
    async fn enqueue_typed<P: JobPayload>(
        &self,
        parent: Option<ParentRef>,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Enqueued, QueueError> {
        let bytes = payload
            .to_bytes()
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        self.enqueue(P::KIND, parent, bytes, options).await
    }
}

impl<T: JobQueue + ?Sized> JobQueueExt for T {}

/// 基于数据库的作业队列实现
#[derive(Clone)]
pub struct DatabaseJobQueue {
    /// 作业仓库
    repo: Arc<dyn JobRepository>,
    /// 完成跟踪器
    tracker: Arc<CompletionTracker>,
    /// 通道配置
    lanes: Arc<LaneTable>,
}

impl DatabaseJobQueue {
    /// 创建新的作业队列实例
    pub fn new(
        repo: Arc<dyn JobRepository>,
        tracker: Arc<CompletionTracker>,
        lanes: Arc<LaneTable>,
    ) -> Self {
        Self {
            repo,
            tracker,
            lanes,
        }
    }

    /// 把入队参数解析为待写入的作业
    pub(crate) fn build_job(
        &self,
        kind: &str,
        parent: Option<ParentRef>,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<NewJob, QueueError> {
        if kind.trim().is_empty() {
            return Err(QueueError::Validation("kind must not be empty".to_string()));
        }

        let lane = self.lanes.lane_for_kind(kind).to_string();
        let config = self.lanes.get(&lane);
        let max_attempts = options.max_attempts.unwrap_or(config.max_attempts);
        if max_attempts < 1 {
            return Err(QueueError::Validation(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }

        Ok(NewJob {
            lane,
            kind: kind.to_string(),
            parent_ref: parent,
            payload,
            priority: options.priority,
            max_attempts,
            scheduled_at: options.not_before.unwrap_or_else(Utc::now),
            dedup_key: options.dedup_key,
        })
    }

    pub(crate) async fn insert(&self, job: NewJob) -> Result<Enqueued, QueueError> {
        let kind = job.kind.clone();
        match self.repo.enqueue(job, Utc::now()).await {
            Ok(job) => {
                debug!("Enqueued job {} ({}) on lane {}", job.id, job.kind, job.lane);
                counter!("jobs_enqueued_total", "kind" => kind).increment(1);
                // A finalized parent that gets new work is open again
                if let Some(parent) = &job.parent_ref {
                    self.tracker.reopen(parent).await?;
                }
                Ok(Enqueued::Scheduled(job.id))
            }
            Err(RepositoryError::Duplicate(key)) => {
                info!("Job with dedup key {} already scheduled", key);
                let existing = self.repo.find_active_by_dedup_key(&key).await?;
                Ok(Enqueued::AlreadyScheduled(existing.map(|j| j.id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobQueue for DatabaseJobQueue {
    async fn enqueue(
        &self,
        kind: &str,
        parent: Option<ParentRef>,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<Enqueued, QueueError> {
        let job = self.build_job(kind, parent, payload, options)?;
        self.insert(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.repo.find_by_id(id).await?)
    }

    async fn get_status(&self, parent: &ParentRef) -> Result<ParentStatus, QueueError> {
        Ok(self.tracker.status(parent).await?)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        let cancelled = self.repo.cancel_pending(id, Utc::now()).await?;
        if !cancelled {
            return Ok(false);
        }

        info!("Cancelled job {}", id);
        // Cancelling the last open job can complete its parent
        if let Some(parent) = self.repo.find_by_id(id).await?.and_then(|j| j.parent_ref) {
            self.tracker.reconcile(&parent, Utc::now()).await?;
        }
        Ok(true)
    }
}
