// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::Job;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

/// 处理器错误类型
#[derive(Error, Debug)]
pub enum HandlerError {
    /// 暂时性失败，按退避策略重试
    #[error("Transient failure: {0}")]
    Transient(String),
    /// 永久失败，不再重试
    #[error("Permanent failure: {0}")]
    Permanent(String),
    /// 没有为该作业类型注册处理器
    #[error("No handler registered for kind {0}")]
    UnknownKind(String),
    /// 负载无法解码
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// 处理器调用超时
    #[error("Handler timed out after {0}s")]
    Timeout(u64),
}

impl HandlerError {
    pub fn transient(message: impl ToString) -> Self {
        HandlerError::Transient(message.to_string())
    }

    pub fn permanent(message: impl ToString) -> Self {
        HandlerError::Permanent(message.to_string())
    }

    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 暂时性失败与超时返回 true，其余为终态失败
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transient(_) | HandlerError::Timeout(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Transient(format!("{:#}", err))
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.status().is_some_and(|s| s.is_server_error())
        {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Permanent(err.to_string())
        }
    }
}

/// 作业处理器特质
///
/// 外部协作方（邮件发送、目录同步、日历推送……）通过实现该特质接入队列
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 执行一次投递尝试
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

type HandlerFn = dyn Fn(Job) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync;

/// 闭包处理器
///
/// 把异步闭包包装成 `JobHandler`
pub struct FnHandler {
    f: Arc<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |job| Box::pin(f(job))),
        }
    }
}

#[async_trait]
impl JobHandler for FnHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        (self.f)(job.clone()).await
    }
}
