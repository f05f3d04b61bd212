// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::scheduler::LaneScheduler;
use crate::workers::retention_worker::RetentionWorker;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 工作管理器
///
/// 持有所有后台任务的句柄，并在收到关闭信号时统一停止
#[derive(Default)]
pub struct WorkerManager {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动各通道的 tick 循环
    pub fn start_lanes(&mut self, scheduler: &LaneScheduler) {
        let handles = scheduler.start();
        info!("Started {} lane loop(s)", handles.len());
        self.handles.extend(handles);
    }

    /// 启动保留与维护工作器
    pub fn start_retention(&mut self, worker: RetentionWorker) {
        self.handles.push(worker.start());
    }

    /// 托管额外的后台任务（例如 HTTP 服务）
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 停止所有后台任务
    ///
    /// 正在执行的 tick 被中断后，其作业会在租约过期后被回收
    pub fn shutdown(&mut self) {
        info!("Shutting down workers...");
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Workers shut down successfully");
    }

    /// 等待关闭信号并关闭工作进程
    ///
    /// 监听关闭信号并优雅地关闭所有工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }

        self.shutdown();
    }
}
