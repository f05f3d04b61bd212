// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lane::{LaneConfig, LaneTable, DEFAULT_LANE};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// 应用程序配置设置
///
/// 包含数据库、服务器、指标、调度器、Webhook 和各通道的配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 数据库配置
    pub database: DatabaseSettings,
    /// 服务器配置
    pub server: ServerSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
    /// 调度器配置
    pub dispatcher: DispatcherSettings,
    /// Webhook 配置
    pub webhook: WebhookSettings,
    /// 通道配置，为空时使用内置通道
    #[serde(default)]
    pub lanes: HashMap<String, LaneConfig>,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 管理接口令牌，为空时不校验
    pub admin_token: Option<String>,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 导出器监听地址
    pub listen: String,
}

/// 调度器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    /// 实例标识，为空时启动时随机生成
    pub instance_id: Option<Uuid>,
    /// 执行中作业的租约时长（秒）
    pub lease_timeout_secs: u64,
    /// 终态作业保留天数
    pub retention_days: u32,
    /// 维护任务间隔（秒）
    pub retention_interval_secs: u64,
    /// 未配置 `default` 通道时使用的触发间隔（秒）
    pub default_tick_interval_secs: u64,
}

impl DispatcherSettings {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs.max(1))
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs.max(1))
    }
}

/// Webhook配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    /// Webhook签名密钥
    pub secret: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加默认值、`config/default`、`config/{APP_ENVIRONMENT}` 和 `JOBRELAY__*` 环境变量
    ///
    /// # 返回值
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            .set_default("database.url", "sqlite://jobrelay.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen", "0.0.0.0:9000")?
            .set_default("dispatcher.lease_timeout_secs", 900)?
            .set_default("dispatcher.retention_days", 30)?
            .set_default("dispatcher.retention_interval_secs", 3600)?
            .set_default("dispatcher.default_tick_interval_secs", 300)?
            .set_default("webhook.secret", "change-me")?
            .set_default("webhook.timeout_secs", 30)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("JOBRELAY").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// 构建通道表
    ///
    /// 未配置任何通道时回退到内置的邮件与 newsletter 通道
    pub fn lane_table(&self) -> LaneTable {
        let mut table = if self.lanes.is_empty() {
            LaneTable::builtin()
        } else {
            LaneTable::new(self.lanes.clone())
        };

        if !table.contains(DEFAULT_LANE) {
            table.insert(
                DEFAULT_LANE,
                LaneConfig {
                    tick_interval_secs: self.dispatcher.default_tick_interval_secs,
                    ..Default::default()
                },
            );
        }
        table
    }
}
