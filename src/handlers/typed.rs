// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::traits::{HandlerError, JobHandler};
use crate::domain::models::job::Job;
use crate::domain::models::payload::JobPayload;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// 强类型处理器适配器
///
/// 先把作业负载解码为 `P`，再交给闭包处理。解码失败是永久错误，
/// 同一份字节重试也不会成功。
pub struct TypedHandler<P, F> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

impl<P, F, Fut> TypedHandler<P, F>
where
    P: JobPayload,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> JobHandler for TypedHandler<P, F>
where
    P: JobPayload,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let payload = P::from_bytes(&job.payload)
            .map_err(|e| HandlerError::InvalidPayload(format!("{} ({})", e, P::KIND)))?;
        (self.f)(payload).await
    }
}
