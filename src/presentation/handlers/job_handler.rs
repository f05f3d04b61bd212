// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::enqueue_request::EnqueueRequestDto;
use crate::application::dto::job_response::JobResponseDto;
use crate::application::dto::purge_request::{PurgeRequestDto, PurgeResponseDto};
use crate::domain::repositories::job_repository::JobRepository;
use crate::presentation::errors::{ApiError, AppError};
use crate::queue::immediate::ImmediateDelivery;
use crate::queue::job_queue::{DatabaseJobQueue, Enqueued, JobQueue};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// 入队作业
///
/// `immediate = true` 时先尝试立即投递一次，暂时性失败才写入队列
///
/// # 返回值
///
/// * `201` - 新作业已写入
/// * `200` - 已存在等价作业，或立即投递已有结果
pub async fn enqueue_job(
    Extension(queue): Extension<Arc<DatabaseJobQueue>>,
    Extension(immediate): Extension<Arc<ImmediateDelivery>>,
    Json(request): Json<EnqueueRequestDto>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let parent = request.parent().map_err(ApiError::BadRequest)?;
    let payload = request.payload_bytes().map_err(ApiError::BadRequest)?;
    let options = request.options();

    if request.immediate {
        let outcome = immediate
            .deliver_or_enqueue(&request.kind, parent, payload, options)
            .await?;
        return Ok((StatusCode::OK, Json(json!(outcome))));
    }

    let enqueued = queue
        .enqueue(&request.kind, parent, payload, options)
        .await?;
    let status = match enqueued {
        Enqueued::Scheduled(_) => StatusCode::CREATED,
        Enqueued::AlreadyScheduled(_) => StatusCode::OK,
    };
    Ok((status, Json(json!(enqueued))))
}

/// 查询作业
pub async fn get_job(
    Extension(queue): Extension<Arc<DatabaseJobQueue>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponseDto>, AppError> {
    let job = queue
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {}", id)))?;
    Ok(Json(job.into()))
}

/// 取消尚未被认领的作业
///
/// # 返回值
///
/// * `200` - 已取消
/// * `404` - 作业不存在
/// * `409` - 作业已被认领或已结束
pub async fn cancel_job(
    Extension(queue): Extension<Arc<DatabaseJobQueue>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if queue.cancel(id).await? {
        return Ok(Json(json!({ "id": id, "cancelled": true })));
    }

    match queue.get_job(id).await? {
        None => Err(ApiError::NotFound(format!("Job {}", id)).into()),
        Some(job) => Err(ApiError::Conflict(format!(
            "job {} is {} and can no longer be cancelled",
            id, job.status
        ))
        .into()),
    }
}

/// 删除超过保留期的终态作业
pub async fn purge_jobs(
    Extension(repository): Extension<Arc<dyn JobRepository>>,
    Json(request): Json<PurgeRequestDto>,
) -> Result<Json<PurgeResponseDto>, AppError> {
    request.validate()?;

    let cutoff = Utc::now() - Duration::days(i64::from(request.older_than_days));
    let purged = repository
        .purge_terminal_before(cutoff, request.lane.as_deref())
        .await?;

    info!(
        "Purged {} terminal job(s) older than {} day(s)",
        purged, request.older_than_days
    );
    Ok(Json(PurgeResponseDto { purged }))
}
