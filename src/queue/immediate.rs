// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::job_queue::{DatabaseJobQueue, Enqueued, QueueError};
use crate::domain::models::job::{EnqueueOptions, Job};
use crate::domain::models::parent::ParentRef;
use crate::domain::models::payload::JobPayload;
use crate::handlers::{HandlerError, HandlerRegistry};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// 立即投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// 立即投递成功
    Delivered,
    /// 立即投递失败，已转入队列重试
    Queued { id: Option<Uuid> },
    /// 永久失败，未入队
    Failed { error: String },
}

/// 先立即投递、失败再入队
///
/// 对应“立刻发送，发送失败则排队”的调用方式，例如事务邮件
#[derive(Clone)]
pub struct ImmediateDelivery {
    queue: DatabaseJobQueue,
    registry: Arc<HandlerRegistry>,
    timeout: Duration,
}

impl ImmediateDelivery {
    pub fn new(queue: DatabaseJobQueue, registry: Arc<HandlerRegistry>, timeout: Duration) -> Self {
        Self {
            queue,
            registry,
            timeout,
        }
    }

    /// 立即尝试一次投递
    ///
    /// # 参数
    ///
    /// * `kind` - 作业类型
    /// * `parent` - 所属父实体
    /// * `payload` - 负载字节
    /// * `options` - 转入队列时使用的入队选项
    ///
    /// # 返回值
    ///
    /// * `Delivered` - 处理器成功，不写入队列
    /// * `Queued` - 暂时性失败，作业已入队（或已存在等价作业）
    /// * `Failed` - 永久失败，不入队
    pub async fn deliver_or_enqueue(
        &self,
        kind: &str,
        parent: Option<ParentRef>,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<Outcome, QueueError> {
        let new_job = self.queue.build_job(kind, parent, payload, options)?;

        // Not persisted unless the attempt fails transiently
        let mut attempt = Job::new(new_job.clone(), Utc::now());
        attempt.attempts = 1;

        let result = match tokio::time::timeout(self.timeout, self.registry.dispatch(&attempt)).await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(self.timeout.as_secs())),
        };

        match result {
            Ok(()) => {
                info!("Delivered {} immediately", kind);
                Ok(Outcome::Delivered)
            }
            Err(e) if e.is_retryable() => {
                warn!("Immediate {} delivery failed, queueing: {}", kind, e);
                Ok(self.queue.insert(new_job).await?.into())
            }
            Err(e) => {
                warn!("Immediate {} delivery failed permanently: {}", kind, e);
                Ok(Outcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    /// 强类型版本
    pub async fn deliver_or_enqueue_typed<P: JobPayload>(
        &self,
        parent: Option<ParentRef>,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Outcome, QueueError> {
        let bytes = payload
            .to_bytes()
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        self.deliver_or_enqueue(P::KIND, parent, bytes, options).await
    }
}

impl From<Enqueued> for Outcome {
    fn from(enqueued: Enqueued) -> Self {
        Outcome::Queued { id: enqueued.id() }
    }
}
