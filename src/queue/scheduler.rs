// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lane::DEFAULT_LANE;
use crate::workers::dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// 通道调度器
///
/// 进程内的周期触发器：每个通道一个后台任务，按通道的间隔调用 `tick`
pub struct LaneScheduler {
    /// 调度器
    dispatcher: Arc<Dispatcher>,
}

impl LaneScheduler {
    /// 创建新的通道调度器实例
    ///
    /// # 参数
    ///
    /// * `dispatcher` - 调度器
    ///
    /// # 返回值
    ///
    /// 返回新的通道调度器实例
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// 为每个已配置的通道以及 default 通道启动后台 tick 循环
    ///
    /// # 返回值
    ///
    /// 返回各后台任务的句柄
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let table = self.dispatcher.lanes();
        let mut lanes: Vec<(String, Duration)> = table
            .iter()
            .map(|(name, config)| (name.clone(), config.tick_interval()))
            .collect();

        // Kinds not listed under any lane still need a trigger
        if !table.contains(DEFAULT_LANE) {
            lanes.push((
                DEFAULT_LANE.to_string(),
                table.get(DEFAULT_LANE).tick_interval(),
            ));
        }

        lanes
            .into_iter()
            .map(|(lane, period)| self.spawn_lane(lane, period))
            .collect()
    }

    /// 启动单个通道的 tick 循环
    pub fn spawn_lane(&self, lane: String, period: Duration) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            info!("Lane {} scheduled every {:?}", lane, period);
            let mut ticker = interval(period);
            // A slow tick must not trigger a burst of catch-up ticks
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if let Err(e) = dispatcher.tick(&lane).await {
                    error!("Tick for lane {} aborted: {}", lane, e);
                }
            }
        })
    }
}
