// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 作业处理器模块
///
/// 定义处理器特质与注册表，并提供强类型适配器和内置的 Webhook 处理器
pub mod registry;
pub mod traits;
pub mod typed;
pub mod webhook_handler;

pub use registry::HandlerRegistry;
pub use traits::{FnHandler, HandlerError, JobHandler};
pub use typed::TypedHandler;
pub use webhook_handler::WebhookHandler;
