// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供调度器、保留维护工作器和后台任务的生命周期管理
pub mod dispatcher;
pub mod manager;
pub mod retention_worker;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatchError, TickReport};
pub use worker::Worker;
