// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::parent::{ParentRef, ParentSummary};
use crate::domain::repositories::job_repository::RepositoryError;
use crate::domain::repositories::parent_completion_repository::ParentCompletionRepository;
use crate::infrastructure::database::entities::parent_completion;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
};
use std::sync::Arc;
use uuid::Uuid;

/// 父实体完成记录仓库实现
#[derive(Clone)]
pub struct ParentCompletionRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl ParentCompletionRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn clamp(count: u64) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

impl From<parent_completion::Model> for ParentSummary {
    fn from(model: parent_completion::Model) -> Self {
        Self {
            parent: ParentRef::new(model.entity_type, model.entity_id),
            total: model.total.max(0) as u64,
            completed: model.completed.max(0) as u64,
            failed: model.failed.max(0) as u64,
            cancelled: model.cancelled.max(0) as u64,
            finalized_at: model.finalized_at.with_timezone(&Utc),
        }
    }
}

#[async_trait]
impl ParentCompletionRepository for ParentCompletionRepositoryImpl {
    async fn insert_if_absent(&self, summary: &ParentSummary) -> Result<bool, RepositoryError> {
        let finalized_at: DateTime<FixedOffset> = summary.finalized_at.into();
        let model = parent_completion::ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_type: Set(summary.parent.entity_type.clone()),
            entity_id: Set(summary.parent.entity_id.clone()),
            total: Set(clamp(summary.total)),
            completed: Set(clamp(summary.completed)),
            failed: Set(clamp(summary.failed)),
            cancelled: Set(clamp(summary.cancelled)),
            finalized_at: Set(finalized_at),
        };

        // The unique (entity_type, entity_id) index decides who finalizes
        match model.insert(self.db.as_ref()).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, parent: &ParentRef) -> Result<Option<ParentSummary>, RepositoryError> {
        let model = parent_completion::Entity::find()
            .filter(parent_completion::Column::EntityType.eq(parent.entity_type.as_str()))
            .filter(parent_completion::Column::EntityId.eq(parent.entity_id.as_str()))
            .one(self.db.as_ref())
            .await?;

        Ok(model.map(Into::into))
    }

    async fn remove(&self, parent: &ParentRef) -> Result<(), RepositoryError> {
        parent_completion::Entity::delete_many()
            .filter(parent_completion::Column::EntityType.eq(parent.entity_type.as_str()))
            .filter(parent_completion::Column::EntityId.eq(parent.entity_id.as_str()))
            .exec(self.db.as_ref())
            .await?;

        Ok(())
    }
}
