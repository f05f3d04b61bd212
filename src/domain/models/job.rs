// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::parent::ParentRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 作业实体
///
/// 表示一个发往外部系统的工作单元，例如一封待发送的邮件、
/// 一次组成员同步或一次日历事件推送。队列从不解析 `payload`，
/// 只负责调度、重试和状态跟踪。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 作业唯一标识符，入队时分配，不可变
    pub id: Uuid,
    /// 所属通道
    pub lane: String,
    /// 作业类型，用于选择处理器
    pub kind: String,
    /// 所属父实体（例如 newsletter:42）
    pub parent_ref: Option<ParentRef>,
    /// 调用方提供的自然键
    pub dedup_key: Option<String>,
    /// 不透明的负载数据
    pub payload: Vec<u8>,
    /// 优先级，数值越小越先处理
    pub priority: i32,
    /// 作业状态
    pub status: JobStatus,
    /// 已尝试次数
    pub attempts: i32,
    /// 最大尝试次数
    pub max_attempts: i32,
    /// 最早可调度时间
    pub scheduled_at: DateTime<Utc>,
    /// 最近一次失败的错误信息
    pub last_error: Option<String>,
    /// 持有租约的调度器实例
    pub lease_owner: Option<Uuid>,
    /// 租约到期时间
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// 进入终态的时间
    pub completed_at: Option<DateTime<Utc>>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

/// 作业状态枚举
///
/// 状态转换遵循以下流程：
/// Pending → InFlight → Completed / Pending(重试) / Failed
/// Pending → Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 等待调度
    #[default]
    Pending,
    /// 已被某个调度器认领，正在执行
    InFlight,
    /// 已成功完成
    Completed,
    /// 已失败且不再重试
    Failed,
    /// 认领前被取消
    Cancelled,
}

impl JobStatus {
    /// 终态集合
    pub const TERMINAL: [JobStatus; 3] =
        [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InFlight => write!(f, "in_flight"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_flight" => Ok(JobStatus::InFlight),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// 入队选项
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// 优先级，数值越小越先处理
    pub priority: i32,
    /// 最大尝试次数，为空时使用通道默认值
    pub max_attempts: Option<i32>,
    /// 最早执行时间，为空表示立即
    pub not_before: Option<DateTime<Utc>>,
    /// 自然去重键
    pub dedup_key: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: None,
            not_before: None,
            dedup_key: None,
        }
    }
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// 待写入存储的新作业
#[derive(Debug, Clone)]
pub struct NewJob {
    pub lane: String,
    pub kind: String,
    pub parent_ref: Option<ParentRef>,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub dedup_key: Option<String>,
}

impl NewJob {
    /// 计算去重键
    ///
    /// 只有提供了自然键的作业参与去重，格式为 `kind|parent|natural_key`
    pub fn dedup_fingerprint(&self) -> Option<String> {
        self.dedup_key.as_ref().map(|natural| {
            let parent = self
                .parent_ref
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_default();
            format!("{}|{}|{}", self.kind, parent, natural)
        })
    }
}

impl Job {
    /// 根据新作业描述创建作业实例
    ///
    /// # 参数
    ///
    /// * `new_job` - 新作业描述
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 返回处于 Pending 状态的作业
    pub fn new(new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lane: new_job.lane,
            kind: new_job.kind,
            parent_ref: new_job.parent_ref,
            dedup_key: new_job.dedup_key,
            payload: new_job.payload,
            priority: new_job.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            scheduled_at: new_job.scheduled_at,
            last_error: None,
            lease_owner: None,
            lease_expires_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
