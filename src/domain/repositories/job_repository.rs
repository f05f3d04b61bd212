// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::{Job, NewJob};
use crate::domain::models::parent::{ParentRef, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DbErr;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 去重键与未结束的作业冲突
    #[error("Duplicate job: {0}")]
    Duplicate(String),
    /// 作业状态已被其他调用方改变
    #[error("Job {0} is no longer in the expected state")]
    Conflict(Uuid),
}

/// 过期租约回收结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimResult {
    /// 放回 pending 的作业数
    pub requeued: u64,
    /// 已达尝试上限、直接置为 failed 的作业数
    pub exhausted: u64,
    /// 被置为 failed 的作业所属父实体
    pub touched_parents: HashSet<ParentRef>,
}

/// 作业仓库特质
///
/// 定义作业记录存储的数据访问接口。所有状态变更都以
/// 当前状态作为条件，调用方通过 `now` 传入时钟。
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 写入新作业
    ///
    /// 去重键与未结束的作业冲突时返回 `RepositoryError::Duplicate`
    async fn enqueue(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, RepositoryError>;

    /// 根据ID查找作业
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError>;

    /// 根据去重键查找未结束的作业
    async fn find_active_by_dedup_key(&self, key: &str)
        -> Result<Option<Job>, RepositoryError>;

    /// 原子认领一批作业
    ///
    /// # 参数
    ///
    /// * `kind` - 作业类型
    /// * `limit` - 最多认领数量
    /// * `now` - 当前时间
    /// * `owner` - 调度器实例标识
    /// * `lease` - 租约时长
    ///
    /// # 返回值
    ///
    /// 返回已转为 in_flight 的作业，按认领顺序排列
    async fn claim_batch(
        &self,
        kind: &str,
        limit: u64,
        now: DateTime<Utc>,
        owner: Uuid,
        lease: Duration,
    ) -> Result<Vec<Job>, RepositoryError>;

    /// 标记作业已完成
    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// 标记作业稍后重试
    async fn mark_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// 标记作业永久失败
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// 回收超过租约仍处于 in_flight 的作业
    async fn reclaim_stale_in_flight(
        &self,
        lane: Option<&str>,
        lease_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReclaimResult, RepositoryError>;

    /// 统计某类型自 `since` 起完成的作业数
    async fn count_completed_since(
        &self,
        kind: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// 统计某类型正在执行的作业数
    async fn count_in_flight(&self, kind: &str) -> Result<u64, RepositoryError>;

    /// 统计父实体下各状态的作业数
    async fn parent_counts(&self, parent: &ParentRef) -> Result<StatusCounts, RepositoryError>;

    /// 通道中有 pending 作业的类型
    async fn pending_kinds(&self, lane: &str) -> Result<Vec<String>, RepositoryError>;

    /// 自 `since` 起进入终态且带父实体的作业所属父实体
    async fn parents_finished_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ParentRef>, RepositoryError>;

    /// 取消尚未被认领的作业
    ///
    /// 返回 `false` 表示作业不存在或已被认领
    async fn cancel_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// 删除早于 `cutoff` 进入终态的作业
    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        lane: Option<&str>,
    ) -> Result<u64, RepositoryError>;
}
