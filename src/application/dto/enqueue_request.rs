// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::EnqueueOptions;
use crate::domain::models::parent::ParentRef;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// 入队请求DTO
///
/// `payload` 与 `payload_base64` 二选一：前者按 JSON 编码存储，后者按原始字节存储
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct EnqueueRequestDto {
    /// 作业类型
    #[validate(length(min = 1, max = 128, message = "kind cannot be empty"))]
    pub kind: String,

    /// 父实体类型
    #[validate(length(min = 1, max = 64))]
    pub parent_type: Option<String>,

    /// 父实体标识
    #[validate(length(min = 1, max = 128))]
    pub parent_id: Option<String>,

    /// JSON 负载
    pub payload: Option<Value>,

    /// Base64 编码的原始负载
    pub payload_base64: Option<String>,

    /// 优先级，数值越小越先处理
    #[serde(default)]
    pub priority: i32,

    /// 最大尝试次数，为空时使用通道默认值
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: Option<i32>,

    /// 最早执行时间
    pub not_before: Option<DateTime<Utc>>,

    /// 去重键
    #[validate(length(min = 1, max = 255))]
    pub dedup_key: Option<String>,

    /// 先立即投递一次，失败再入队
    #[serde(default)]
    pub immediate: bool,
}

impl EnqueueRequestDto {
    /// 解析父实体引用，类型与标识必须同时提供
    pub fn parent(&self) -> Result<Option<ParentRef>, String> {
        match (&self.parent_type, &self.parent_id) {
            (Some(entity_type), Some(entity_id)) => {
                Ok(Some(ParentRef::new(entity_type.clone(), entity_id.clone())))
            }
            (None, None) => Ok(None),
            _ => Err("parent_type and parent_id must be provided together".to_string()),
        }
    }

    /// 解析负载字节
    pub fn payload_bytes(&self) -> Result<Vec<u8>, String> {
        match (&self.payload, &self.payload_base64) {
            (Some(_), Some(_)) => {
                Err("payload and payload_base64 are mutually exclusive".to_string())
            }
            (Some(value), None) => serde_json::to_vec(value).map_err(|e| e.to_string()),
            (None, Some(encoded)) => STANDARD
                .decode(encoded)
                .map_err(|e| format!("invalid payload_base64: {}", e)),
            (None, None) => Ok(Vec::new()),
        }
    }

    pub fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            max_attempts: self.max_attempts,
            not_before: self.not_before,
            dedup_key: self.dedup_key.clone(),
        }
    }
}
