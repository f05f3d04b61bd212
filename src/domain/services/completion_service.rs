// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::parent::{ParentRef, ParentStatus, ParentSummary, Reconciliation};
use crate::domain::repositories::job_repository::{JobRepository, RepositoryError};
use crate::domain::repositories::parent_completion_repository::ParentCompletionRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// 父实体终态回调
///
/// 由外部协作方实现，例如把 newsletter 标记为已发送，
/// 或在全部成员同步后更新组的同步时间。
#[async_trait]
pub trait ParentFinalizer: Send + Sync {
    /// 父实体第一次进入终态时调用
    async fn finalize(&self, summary: &ParentSummary) -> anyhow::Result<()>;
}

/// 完成跟踪错误类型
#[derive(Error, Debug)]
pub enum CompletionError {
    /// 存储错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// 终态回调失败，完成记录已撤销
    #[error("Finalizer for {parent} failed: {source}")]
    Finalizer {
        parent: String,
        #[source]
        source: anyhow::Error,
    },
}

/// 完成跟踪器
///
/// 父实体的所有作业都进入终态后，写入唯一的完成记录并调用一次终态回调
#[derive(Clone)]
pub struct CompletionTracker {
    jobs: Arc<dyn JobRepository>,
    completions: Arc<dyn ParentCompletionRepository>,
    finalizers: HashMap<String, Arc<dyn ParentFinalizer>>,
}

impl CompletionTracker {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        completions: Arc<dyn ParentCompletionRepository>,
    ) -> Self {
        Self {
            jobs,
            completions,
            finalizers: HashMap::new(),
        }
    }

    /// 为某类父实体注册终态回调
    pub fn register_finalizer(
        &mut self,
        entity_type: impl Into<String>,
        finalizer: Arc<dyn ParentFinalizer>,
    ) {
        self.finalizers.insert(entity_type.into(), finalizer);
    }

    pub fn with_finalizer(
        mut self,
        entity_type: impl Into<String>,
        finalizer: Arc<dyn ParentFinalizer>,
    ) -> Self {
        self.register_finalizer(entity_type, finalizer);
        self
    }

    /// 对父实体进行对账
    ///
    /// # 参数
    ///
    /// * `parent` - 父实体引用
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// * `Open` - 仍有 pending 或 in_flight 作业，或父实体下没有作业
    /// * `Finalized` - 本次调用写入了完成记录
    /// * `AlreadyFinal` - 完成记录早已存在
    pub async fn reconcile(
        &self,
        parent: &ParentRef,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, CompletionError> {
        let counts = self.jobs.parent_counts(parent).await?;
        if counts.is_open() || counts.total() == 0 {
            return Ok(Reconciliation::Open(counts));
        }

        let summary = ParentSummary::from_counts(parent.clone(), counts, now);
        if !self.completions.insert_if_absent(&summary).await? {
            return Ok(Reconciliation::AlreadyFinal);
        }

        if let Some(finalizer) = self.finalizers.get(&parent.entity_type) {
            if let Err(e) = finalizer.finalize(&summary).await {
                error!("Finalizer for {} failed, will retry: {:#}", parent, e);
                // Undo so the next reconcile retries the finalizer
                self.completions.remove(parent).await?;
                return Err(CompletionError::Finalizer {
                    parent: parent.to_string(),
                    source: e,
                });
            }
        }

        metrics::counter!("parents_finalized_total", "entity_type" => parent.entity_type.clone())
            .increment(1);
        info!(
            "Parent {} finalized: {} completed, {} failed, {} cancelled",
            parent, summary.completed, summary.failed, summary.cancelled
        );

        Ok(Reconciliation::Finalized(summary))
    }

    /// 查询父实体状态
    pub async fn status(&self, parent: &ParentRef) -> Result<ParentStatus, CompletionError> {
        let counts = self.jobs.parent_counts(parent).await?;
        let finalized = self.completions.find(parent).await?.is_some();
        Ok(ParentStatus::new(counts, finalized))
    }

    /// 父实体有新作业入队时撤销其完成记录
    ///
    /// 之后的对账会按新的计数重新置为终态并再次调用终态回调
    ///
    /// # 返回值
    ///
    /// 存在完成记录并已删除时返回 `true`
    pub async fn reopen(&self, parent: &ParentRef) -> Result<bool, CompletionError> {
        if self.completions.find(parent).await?.is_none() {
            return Ok(false);
        }

        self.completions.remove(parent).await?;
        info!("Parent {} reopened by a new job", parent);
        Ok(true)
    }

    /// 对自 `since` 起有作业结束的父实体补做对账
    ///
    /// 用于修复调度器在结束作业后、对账前崩溃留下的父实体
    ///
    /// # 返回值
    ///
    /// 返回本次被置为终态的父实体数量
    pub async fn sweep(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, CompletionError> {
        let parents = self.jobs.parents_finished_since(since).await?;
        let mut finalized = 0;

        for parent in parents {
            match self.reconcile(&parent, now).await {
                Ok(Reconciliation::Finalized(_)) => finalized += 1,
                Ok(_) => {}
                Err(CompletionError::Finalizer { parent, source }) => {
                    warn!("Sweep could not finalize {}: {:#}", parent, source);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(finalized)
    }
}
