// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lane::RateLimitConfig;
use crate::domain::repositories::job_repository::{JobRepository, RepositoryError};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::debug;

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitingError {
    #[error("配置错误: {0}")]
    ConfigurationError(String),

    #[error("存储错误: {0}")]
    Repository(#[from] RepositoryError),
}

/// 计算 `now` 所在固定窗口的起点
///
/// 窗口按 Unix 纪元对齐，3600 秒的窗口即整点开始
pub fn window_start(now: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let window = window_secs.max(1) as i64;
    let ts = now.timestamp();
    let start = ts - ts.rem_euclid(window);
    Utc.timestamp_opt(start, 0).single().unwrap_or(now)
}

/// 计算窗口内还能放行的数量
///
/// `max(0, ceiling - completed - in_flight)`，再与请求数取较小值
pub fn remaining_capacity(
    ceiling: u64,
    completed_in_window: u64,
    in_flight: u64,
    requested: u64,
) -> u64 {
    ceiling
        .saturating_sub(completed_in_window)
        .saturating_sub(in_flight)
        .min(requested)
}

/// 速率限制器
///
/// 窗口计数不单独保存，每次都从作业表的 completed 与 in_flight 行重新计算，
/// 进程重启后不会丢失窗口状态。
#[derive(Clone)]
pub struct RateLimiter {
    repo: Arc<dyn JobRepository>,
}

impl RateLimiter {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }

    /// 计算本次允许认领的数量
    ///
    /// # 参数
    ///
    /// * `kind` - 作业类型
    /// * `limit` - 通道的速率上限，为空表示不限制
    /// * `requested` - 希望认领的数量
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 返回不超过 `requested` 的允许数量，0 表示本轮跳过该类型
    pub async fn allow(
        &self,
        kind: &str,
        limit: Option<&RateLimitConfig>,
        requested: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, RateLimitingError> {
        let Some(limit) = limit else {
            return Ok(requested);
        };

        if limit.window_secs == 0 {
            return Err(RateLimitingError::ConfigurationError(format!(
                "rate limit window for {} must be positive",
                kind
            )));
        }

        let since = window_start(now, limit.window_secs);
        let completed = self.repo.count_completed_since(kind, since).await?;
        let in_flight = self.repo.count_in_flight(kind).await?;
        let allowed = remaining_capacity(limit.ceiling, completed, in_flight, requested);

        debug!(
            kind,
            ceiling = limit.ceiling,
            completed,
            in_flight,
            requested,
            allowed,
            "Rate window evaluated"
        );

        Ok(allowed)
    }
}
