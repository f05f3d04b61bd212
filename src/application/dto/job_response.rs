// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::{Job, JobStatus};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业响应DTO
///
/// 负载以 Base64 返回，队列本身不解释其内容
#[derive(Debug, Deserialize, Serialize)]
pub struct JobResponseDto {
    pub id: Uuid,
    pub lane: String,
    pub kind: String,
    /// 形如 `newsletter:42`
    pub parent: Option<String>,
    pub dedup_key: Option<String>,
    pub payload_base64: String,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponseDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            lane: job.lane,
            kind: job.kind,
            parent: job.parent_ref.map(|p| p.to_string()),
            dedup_key: job.dedup_key,
            payload_base64: STANDARD.encode(&job.payload),
            priority: job.priority,
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            scheduled_at: job.scheduled_at,
            last_error: job.last_error,
            completed_at: job.completed_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
