// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::traits::{FnHandler, HandlerError, JobHandler};
use super::typed::TypedHandler;
use crate::domain::models::job::Job;
use crate::domain::models::payload::JobPayload;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

/// 处理器注册表
///
/// 启动时构建一次，之后只读共享。作业类型到处理器一一对应。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器
    ///
    /// # 参数
    ///
    /// * `kind` - 作业类型
    /// * `handler` - 处理器
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            warn!("Handler for kind {} replaced", kind);
        }
        self
    }

    /// 注册异步闭包
    pub fn register_fn<F, Fut>(&mut self, kind: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnHandler::new(f)))
    }

    /// 注册强类型处理闭包，作业类型取 `P::KIND`
    pub fn register_typed<P, F, Fut>(&mut self, f: F) -> &mut Self
    where
        P: JobPayload,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(P::KIND, Arc::new(TypedHandler::<P, F>::new(f)))
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// 已注册的作业类型（排序后）
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// 把作业交给其类型对应的处理器
    ///
    /// 未注册的类型返回 `UnknownKind`，处理器 panic 转为永久失败，二者都是终态
    pub async fn dispatch(&self, job: &Job) -> Result<(), HandlerError> {
        let Some(handler) = self.handlers.get(&job.kind) else {
            error!("No handler registered for kind {} (job {})", job.kind, job.id);
            return Err(HandlerError::UnknownKind(job.kind.clone()));
        };

        // The panic stays inside this job; the rest of the batch keeps running
        match AssertUnwindSafe(async { handler.handle(job).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    "Handler for kind {} panicked on job {}: {}",
                    job.kind, job.id, message
                );
                Err(HandlerError::permanent(format!("handler panicked: {}", message)))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
