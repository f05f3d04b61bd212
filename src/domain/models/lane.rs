// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 未显式配置的作业类型落入的通道
pub const DEFAULT_LANE: &str = "default";

/// 速率上限配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每个窗口内允许完成的作业数
    pub ceiling: u64,
    /// 窗口长度（秒），按 Unix 纪元对齐
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    3600
}

/// 通道配置
///
/// 一个通道对应源系统中的一条独立队列（邮件、newsletter、目录同步……），
/// 拥有自己的节奏、批量、并发、重试和速率上限。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneConfig {
    /// 属于该通道的作业类型
    #[serde(default)]
    pub kinds: Vec<String>,
    /// 周期触发间隔（秒）
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// 单次 tick 最多认领的数量（通道内各类型共享）
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// 并发执行的处理器数量
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 默认最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// 退避基数（秒）
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// 单个处理器调用超时（秒）
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// 速率上限，为空表示不限制
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_tick_interval_secs() -> u64 {
    300
}

fn default_batch_size() -> u64 {
    50
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> i32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    300
}

fn default_handler_timeout_secs() -> u64 {
    60
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            tick_interval_secs: default_tick_interval_secs(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
            rate_limit: None,
        }
    }
}

impl LaneConfig {
    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rate_limit(mut self, ceiling: u64, window_secs: u64) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            ceiling,
            window_secs,
        });
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs.max(1))
    }
}

/// 通道表
///
/// 保存通道名到配置的映射，并负责把作业类型解析到所属通道
#[derive(Debug, Clone, Default)]
pub struct LaneTable {
    lanes: HashMap<String, LaneConfig>,
}

impl LaneTable {
    pub fn new(lanes: HashMap<String, LaneConfig>) -> Self {
        Self { lanes }
    }

    /// 源系统默认的通道：邮件每 5 分钟一次，newsletter 每小时 100 封
    pub fn builtin() -> Self {
        let mut lanes = HashMap::new();
        lanes.insert(
            "email".to_string(),
            LaneConfig {
                tick_interval_secs: 300,
                max_attempts: 3,
                backoff_base_secs: 300,
                ..Default::default()
            }
            .with_kinds(["email.send"]),
        );
        lanes.insert(
            "newsletter".to_string(),
            LaneConfig {
                batch_size: 50,
                ..Default::default()
            }
            .with_kinds(["newsletter.send"])
            .with_rate_limit(100, 3600),
        );
        Self { lanes }
    }

    /// 根据作业类型查找所属通道
    ///
    /// # 参数
    ///
    /// * `kind` - 作业类型
    ///
    /// # 返回值
    ///
    /// 返回配置中列出该类型的通道名，未列出时返回 `default`
    pub fn lane_for_kind(&self, kind: &str) -> &str {
        self.lanes
            .iter()
            .find(|(_, config)| config.kinds.iter().any(|k| k == kind))
            .map(|(name, _)| name.as_str())
            .unwrap_or(DEFAULT_LANE)
    }

    /// 获取通道配置，未配置的通道使用默认值
    pub fn get(&self, lane: &str) -> LaneConfig {
        self.lanes.get(lane).cloned().unwrap_or_default()
    }

    pub fn contains(&self, lane: &str) -> bool {
        self.lanes.contains_key(lane)
    }

    /// 所有已配置的通道名（排序后，便于稳定输出）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LaneConfig)> {
        self.lanes.iter()
    }

    pub fn insert(&mut self, lane: impl Into<String>, config: LaneConfig) {
        self.lanes.insert(lane.into(), config);
    }
}
