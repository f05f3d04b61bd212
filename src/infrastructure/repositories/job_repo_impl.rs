// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::{Job, JobStatus, NewJob};
use crate::domain::models::parent::{ParentRef, StatusCounts};
use crate::domain::repositories::job_repository::{
    JobRepository, ReclaimResult, RepositoryError,
};
use crate::infrastructure::database::entities::job as job_entity;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 统一以 UTC 偏移写入时间，保证 SQLite 中按文本比较的顺序正确
fn at(ts: DateTime<Utc>) -> DateTime<FixedOffset> {
    ts.into()
}

fn terminal_statuses() -> Vec<String> {
    JobStatus::TERMINAL.iter().map(|s| s.to_string()).collect()
}

/// 作业仓库实现
///
/// 基于SeaORM实现的作业记录存储
#[derive(Clone)]
pub struct JobRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl JobRepositoryImpl {
    /// 创建新的作业仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    ///
    /// # 返回值
    ///
    /// 返回新的作业仓库实例
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 超过租约的 in_flight 作业条件
    fn stale_condition(lane: Option<&str>, lease_timeout: Duration, now: DateTime<Utc>) -> Condition {
        let threshold = now - lease_timeout;
        let mut condition = Condition::all()
            .add(job_entity::Column::Status.eq(JobStatus::InFlight.to_string()))
            .add(
                Condition::any()
                    .add(job_entity::Column::LeaseExpiresAt.lte(at(now)))
                    .add(job_entity::Column::UpdatedAt.lte(at(threshold))),
            );

        if let Some(lane) = lane {
            condition = condition.add(job_entity::Column::Lane.eq(lane));
        }

        condition
    }

    /// 以 in_flight 为前提条件的终态/重试更新
    async fn transition_from_in_flight(
        &self,
        id: Uuid,
        update: sea_orm::UpdateMany<job_entity::Entity>,
    ) -> Result<(), RepositoryError> {
        let result = update
            .filter(job_entity::Column::Id.eq(id))
            .filter(job_entity::Column::Status.eq(JobStatus::InFlight.to_string()))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::Conflict(id));
        }

        Ok(())
    }
}

impl From<job_entity::Model> for Job {
    fn from(model: job_entity::Model) -> Self {
        let parent_ref = match (model.parent_type, model.parent_id) {
            (Some(entity_type), Some(entity_id)) => Some(ParentRef::new(entity_type, entity_id)),
            _ => None,
        };

        Self {
            id: model.id,
            lane: model.lane,
            kind: model.kind,
            parent_ref,
            dedup_key: model.dedup_key,
            payload: model.payload,
            priority: model.priority,
            status: model.status.parse().unwrap_or_default(),
            attempts: model.attempts,
            max_attempts: model.max_attempts,
            scheduled_at: model.scheduled_at.with_timezone(&Utc),
            last_error: model.last_error,
            lease_owner: model.lease_owner,
            lease_expires_at: model.lease_expires_at.map(|t| t.with_timezone(&Utc)),
            completed_at: model.completed_at.map(|t| t.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<Job> for job_entity::ActiveModel {
    fn from(job: Job) -> Self {
        let (parent_type, parent_id) = match job.parent_ref {
            Some(parent) => (Some(parent.entity_type), Some(parent.entity_id)),
            None => (None, None),
        };

        Self {
            id: Set(job.id),
            lane: Set(job.lane),
            kind: Set(job.kind),
            parent_type: Set(parent_type),
            parent_id: Set(parent_id),
            dedup_key: Set(job.dedup_key),
            active_dedup_key: Set(None),
            payload: Set(job.payload),
            priority: Set(job.priority),
            status: Set(job.status.to_string()),
            attempts: Set(job.attempts),
            max_attempts: Set(job.max_attempts),
            scheduled_at: Set(at(job.scheduled_at)),
            last_error: Set(job.last_error),
            lease_owner: Set(job.lease_owner),
            lease_expires_at: Set(job.lease_expires_at.map(at)),
            completed_at: Set(job.completed_at.map(at)),
            created_at: Set(at(job.created_at)),
            updated_at: Set(at(job.updated_at)),
        }
    }
}

#[async_trait]
impl JobRepository for JobRepositoryImpl {
    async fn enqueue(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, RepositoryError> {
        let fingerprint = job.dedup_fingerprint();
        let record = Job::new(job, now);

        let mut model: job_entity::ActiveModel = record.clone().into();
        model.active_dedup_key = Set(fingerprint.clone());

        match model.insert(self.db.as_ref()).await {
            Ok(_) => Ok(record),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(RepositoryError::Duplicate(fingerprint.unwrap_or_default()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        let model = job_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }

    async fn find_active_by_dedup_key(
        &self,
        key: &str,
    ) -> Result<Option<Job>, RepositoryError> {
        let model = job_entity::Entity::find()
            .filter(job_entity::Column::ActiveDedupKey.eq(key))
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }

    async fn claim_batch(
        &self,
        kind: &str,
        limit: u64,
        now: DateTime<Utc>,
        owner: Uuid,
        lease: Duration,
    ) -> Result<Vec<Job>, RepositoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin().await?;

        // Row locks are skipped by other claimers on PostgreSQL; SQLite ignores the clause
        let candidates = job_entity::Entity::find()
            .filter(job_entity::Column::Kind.eq(kind))
            .filter(job_entity::Column::Status.eq(JobStatus::Pending.to_string()))
            .filter(job_entity::Column::ScheduledAt.lte(at(now)))
            .filter(
                Expr::col(job_entity::Column::Attempts)
                    .lt(Expr::col(job_entity::Column::MaxAttempts)),
            )
            .order_by_asc(job_entity::Column::Priority)
            .order_by_asc(job_entity::Column::ScheduledAt)
            .order_by_asc(job_entity::Column::CreatedAt)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await?;

        let lease_expires_at = now + lease;
        let mut claimed = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            // Compare-and-swap: a row another claimer already took is left alone
            let result = job_entity::Entity::update_many()
                .col_expr(
                    job_entity::Column::Status,
                    Expr::value(JobStatus::InFlight.to_string()),
                )
                .col_expr(
                    job_entity::Column::Attempts,
                    Expr::col(job_entity::Column::Attempts).add(1),
                )
                .col_expr(job_entity::Column::LeaseOwner, Expr::value(Some(owner)))
                .col_expr(
                    job_entity::Column::LeaseExpiresAt,
                    Expr::value(Some(at(lease_expires_at))),
                )
                .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
                .filter(job_entity::Column::Id.eq(candidate.id))
                .filter(job_entity::Column::Status.eq(JobStatus::Pending.to_string()))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                debug!("Job {} was claimed concurrently, skipping", candidate.id);
                continue;
            }

            let mut job: Job = candidate.into();
            job.status = JobStatus::InFlight;
            job.attempts += 1;
            job.lease_owner = Some(owner);
            job.lease_expires_at = Some(lease_expires_at);
            job.updated_at = now;
            claimed.push(job);
        }

        txn.commit().await?;

        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let update = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::Status,
                Expr::value(JobStatus::Completed.to_string()),
            )
            .col_expr(job_entity::Column::CompletedAt, Expr::value(Some(at(now))))
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
            .col_expr(
                job_entity::Column::ActiveDedupKey,
                Expr::value(Option::<String>::None),
            )
            .col_expr(job_entity::Column::LeaseOwner, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job_entity::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            );

        self.transition_from_in_flight(id, update).await
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let update = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::Status,
                Expr::value(JobStatus::Pending.to_string()),
            )
            .col_expr(
                job_entity::Column::ScheduledAt,
                Expr::value(at(next_attempt_at)),
            )
            .col_expr(
                job_entity::Column::LastError,
                Expr::value(Some(error.to_string())),
            )
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
            .col_expr(job_entity::Column::LeaseOwner, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job_entity::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            );

        self.transition_from_in_flight(id, update).await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let update = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::Status,
                Expr::value(JobStatus::Failed.to_string()),
            )
            .col_expr(
                job_entity::Column::LastError,
                Expr::value(Some(error.to_string())),
            )
            .col_expr(job_entity::Column::CompletedAt, Expr::value(Some(at(now))))
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
            .col_expr(
                job_entity::Column::ActiveDedupKey,
                Expr::value(Option::<String>::None),
            )
            .col_expr(job_entity::Column::LeaseOwner, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job_entity::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            );

        self.transition_from_in_flight(id, update).await
    }

    async fn reclaim_stale_in_flight(
        &self,
        lane: Option<&str>,
        lease_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReclaimResult, RepositoryError> {
        let txn = self.db.begin().await?;

        // Jobs already at the attempt cap could never be claimed again
        let exhausted = job_entity::Entity::find()
            .filter(Self::stale_condition(lane, lease_timeout, now))
            .filter(
                Expr::col(job_entity::Column::Attempts)
                    .gte(Expr::col(job_entity::Column::MaxAttempts)),
            )
            .all(&txn)
            .await?;

        let mut touched_parents = HashSet::new();
        let exhausted_ids: Vec<Uuid> = exhausted
            .into_iter()
            .map(|model| {
                if let (Some(entity_type), Some(entity_id)) = (model.parent_type, model.parent_id) {
                    touched_parents.insert(ParentRef::new(entity_type, entity_id));
                }
                model.id
            })
            .collect();

        let mut exhausted_count = 0;
        if !exhausted_ids.is_empty() {
            let result = job_entity::Entity::update_many()
                .col_expr(
                    job_entity::Column::Status,
                    Expr::value(JobStatus::Failed.to_string()),
                )
                .col_expr(
                    job_entity::Column::LastError,
                    Expr::value(Some("lease expired on final attempt".to_string())),
                )
                .col_expr(job_entity::Column::CompletedAt, Expr::value(Some(at(now))))
                .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
                .col_expr(
                    job_entity::Column::ActiveDedupKey,
                    Expr::value(Option::<String>::None),
                )
                .col_expr(job_entity::Column::LeaseOwner, Expr::value(Option::<Uuid>::None))
                .col_expr(
                    job_entity::Column::LeaseExpiresAt,
                    Expr::value(Option::<DateTime<FixedOffset>>::None),
                )
                .filter(job_entity::Column::Id.is_in(exhausted_ids))
                .filter(job_entity::Column::Status.eq(JobStatus::InFlight.to_string()))
                .exec(&txn)
                .await?;
            exhausted_count = result.rows_affected;
        }

        // Attempts stay as they are, the increment happened at claim time
        let requeued = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::Status,
                Expr::value(JobStatus::Pending.to_string()),
            )
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
            .col_expr(job_entity::Column::LeaseOwner, Expr::value(Option::<Uuid>::None))
            .col_expr(
                job_entity::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<FixedOffset>>::None),
            )
            .filter(Self::stale_condition(lane, lease_timeout, now))
            .filter(
                Expr::col(job_entity::Column::Attempts)
                    .lt(Expr::col(job_entity::Column::MaxAttempts)),
            )
            .exec(&txn)
            .await?;

        txn.commit().await?;

        if requeued.rows_affected > 0 || exhausted_count > 0 {
            warn!(
                "Reclaimed stale in-flight jobs: {} requeued, {} exhausted",
                requeued.rows_affected, exhausted_count
            );
        }

        Ok(ReclaimResult {
            requeued: requeued.rows_affected,
            exhausted: exhausted_count,
            touched_parents,
        })
    }

    async fn count_completed_since(
        &self,
        kind: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let count = job_entity::Entity::find()
            .filter(job_entity::Column::Kind.eq(kind))
            .filter(job_entity::Column::Status.eq(JobStatus::Completed.to_string()))
            .filter(job_entity::Column::CompletedAt.gte(at(since)))
            .count(self.db.as_ref())
            .await?;

        Ok(count)
    }

    async fn count_in_flight(&self, kind: &str) -> Result<u64, RepositoryError> {
        let count = job_entity::Entity::find()
            .filter(job_entity::Column::Kind.eq(kind))
            .filter(job_entity::Column::Status.eq(JobStatus::InFlight.to_string()))
            .count(self.db.as_ref())
            .await?;

        Ok(count)
    }

    async fn parent_counts(&self, parent: &ParentRef) -> Result<StatusCounts, RepositoryError> {
        let rows: Vec<(String, i64)> = job_entity::Entity::find()
            .select_only()
            .column(job_entity::Column::Status)
            .column_as(Expr::col(job_entity::Column::Id).count(), "count")
            .filter(job_entity::Column::ParentType.eq(parent.entity_type.as_str()))
            .filter(job_entity::Column::ParentId.eq(parent.entity_id.as_str()))
            .group_by(job_entity::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => counts.pending += count,
                Ok(JobStatus::InFlight) => counts.in_flight += count,
                Ok(JobStatus::Completed) => counts.completed += count,
                Ok(JobStatus::Failed) => counts.failed += count,
                Ok(JobStatus::Cancelled) => counts.cancelled += count,
                Err(_) => {
                    return Err(RepositoryError::Database(DbErr::Custom(format!(
                        "unknown job status: {}",
                        status
                    ))))
                }
            }
        }

        Ok(counts)
    }

    async fn pending_kinds(&self, lane: &str) -> Result<Vec<String>, RepositoryError> {
        let kinds: Vec<String> = job_entity::Entity::find()
            .select_only()
            .column(job_entity::Column::Kind)
            .filter(job_entity::Column::Lane.eq(lane))
            .filter(job_entity::Column::Status.eq(JobStatus::Pending.to_string()))
            .distinct()
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(kinds)
    }

    async fn parents_finished_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ParentRef>, RepositoryError> {
        let rows: Vec<(Option<String>, Option<String>)> = job_entity::Entity::find()
            .select_only()
            .column(job_entity::Column::ParentType)
            .column(job_entity::Column::ParentId)
            .filter(job_entity::Column::ParentType.is_not_null())
            .filter(job_entity::Column::ParentId.is_not_null())
            .filter(job_entity::Column::Status.is_in(terminal_statuses()))
            .filter(job_entity::Column::CompletedAt.gte(at(since)))
            .distinct()
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                (Some(entity_type), Some(entity_id)) => Some(ParentRef::new(entity_type, entity_id)),
                _ => None,
            })
            .collect())
    }

    async fn cancel_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = job_entity::Entity::update_many()
            .col_expr(
                job_entity::Column::Status,
                Expr::value(JobStatus::Cancelled.to_string()),
            )
            .col_expr(job_entity::Column::CompletedAt, Expr::value(Some(at(now))))
            .col_expr(job_entity::Column::UpdatedAt, Expr::value(at(now)))
            .col_expr(
                job_entity::Column::ActiveDedupKey,
                Expr::value(Option::<String>::None),
            )
            .filter(job_entity::Column::Id.eq(id))
            .filter(job_entity::Column::Status.eq(JobStatus::Pending.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        lane: Option<&str>,
    ) -> Result<u64, RepositoryError> {
        let mut delete = job_entity::Entity::delete_many()
            .filter(job_entity::Column::Status.is_in(terminal_statuses()))
            .filter(job_entity::Column::CompletedAt.lt(at(cutoff)));

        if let Some(lane) = lane {
            delete = delete.filter(job_entity::Column::Lane.eq(lane));
        }

        let result = delete.exec(self.db.as_ref()).await?;
        Ok(result.rows_affected)
    }
}
