// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::parent::{ParentRef, ParentStatus};
use crate::presentation::errors::AppError;
use crate::queue::job_queue::{DatabaseJobQueue, JobQueue};
use axum::{
    extract::{Extension, Path},
    Json,
};
use std::sync::Arc;

/// 查询父实体的作业汇总
pub async fn get_parent_status(
    Extension(queue): Extension<Arc<DatabaseJobQueue>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<ParentStatus>, AppError> {
    let parent = ParentRef::new(entity_type, entity_id);
    Ok(Json(queue.get_status(&parent).await?))
}
