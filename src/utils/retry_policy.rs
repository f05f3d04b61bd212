// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// 重试退避策略
///
/// 第 n 次重试的等待时间为 `base * 2^(n-1)`，溢出时饱和，
/// 除最大尝试次数外没有上限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 退避基数
    pub base: Duration,
    /// 最大尝试次数
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(300),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_attempts: i32) -> Self {
        Self { base, max_attempts }
    }

    /// 计算第 `attempt` 次重试前的等待时间
    ///
    /// # 参数
    ///
    /// * `attempt` - 重试序号，第一次重试为 1
    ///
    /// # 返回值
    ///
    /// 返回退避时长，超出表示范围时返回 `Duration::MAX`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        match 2u32.checked_pow(exponent) {
            Some(factor) => self.base.saturating_mul(factor),
            None if self.base.is_zero() => Duration::ZERO,
            None => Duration::MAX,
        }
    }

    /// 计算下次重试时间
    pub fn next_retry_time(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.next_delay(attempt))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// 是否应该重试
    pub fn should_retry(attempts: i32, max_attempts: i32) -> bool {
        attempts < max_attempts
    }
}
