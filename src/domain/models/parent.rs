// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 父实体引用
///
/// 一组作业所属的业务实体，例如一期 newsletter 或一次日历同步。
/// 文本形式为 `entity_type:entity_id`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl ParentRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for ParentRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // entity_id may itself contain ':'
        match s.split_once(':') {
            Some((entity_type, entity_id)) if !entity_type.is_empty() && !entity_id.is_empty() => {
                Ok(ParentRef::new(entity_type, entity_id))
            }
            _ => Err(format!("invalid parent reference: {}", s)),
        }
    }
}

/// 父实体下各状态的作业数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_flight + self.completed + self.failed + self.cancelled
    }

    /// 仍有未结束的作业
    pub fn is_open(&self) -> bool {
        self.pending > 0 || self.in_flight > 0
    }
}

/// 父实体完成摘要
///
/// 在父实体第一次进入终态时交给 `ParentFinalizer`，
/// 部分成功时通过 `completed` 与 `failed` 表达（例如 41 成功 3 失败）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSummary {
    pub parent: ParentRef,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub finalized_at: DateTime<Utc>,
}

impl ParentSummary {
    pub fn from_counts(parent: ParentRef, counts: StatusCounts, now: DateTime<Utc>) -> Self {
        Self {
            parent,
            total: counts.total(),
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            finalized_at: now,
        }
    }

    /// 全部作业都成功
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// 对外暴露的父实体状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentStatus {
    pub total: u64,
    pub pending: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub finalized: bool,
}

impl ParentStatus {
    pub fn new(counts: StatusCounts, finalized: bool) -> Self {
        Self {
            total: counts.total(),
            pending: counts.pending,
            in_flight: counts.in_flight,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            finalized,
        }
    }
}

/// 父实体对账结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// 仍有 pending 或 in_flight 作业
    Open(StatusCounts),
    /// 本次调用将父实体置为终态
    Finalized(ParentSummary),
    /// 之前已经置为终态，本次无操作
    AlreadyFinal,
}
