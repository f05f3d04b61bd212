// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// 强类型作业负载
///
/// 每种负载类型绑定一个固定的作业类型标签，
/// 入队时序列化为 JSON 字节，处理时再反序列化。
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 作业类型标签
    const KIND: &'static str;

    /// 编码为存储用的字节
    fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 从存储字节解码
    fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// 事务邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub html: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl JobPayload for EmailMessage {
    const KIND: &'static str = "email.send";
}

/// 向单个订阅者投递一期 newsletter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterDelivery {
    pub newsletter_id: String,
    pub subscriber_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_name: Option<String>,
}

impl JobPayload for NewsletterDelivery {
    const KIND: &'static str = "newsletter.send";
}

/// 目录组成员变更
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
    Add,
    Remove,
}

/// 目录组成员同步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMembershipSync {
    pub group_id: String,
    pub user_id: String,
    pub action: MembershipAction,
}

impl JobPayload for GroupMembershipSync {
    const KIND: &'static str = "azuread.group_sync";
}

/// 日历事件操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarOperation {
    Upsert,
    Delete,
}

/// 日历事件推送
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventPush {
    pub calendar_id: String,
    pub event_id: String,
    pub operation: CalendarOperation,
    #[serde(default)]
    pub event: serde_json::Value,
}

impl JobPayload for CalendarEventPush {
    const KIND: &'static str = "calendar.push_event";
}

/// 通用 Webhook 投递
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub url: String,
    pub event: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl JobPayload for WebhookDelivery {
    const KIND: &'static str = "webhook.post";
}
