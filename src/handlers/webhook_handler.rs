// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::traits::{HandlerError, JobHandler};
use crate::domain::models::job::Job;
use crate::domain::models::payload::{JobPayload, WebhookDelivery};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use metrics::{counter, histogram};
use reqwest::{header, Client, StatusCode};
use sha2::Sha256;
use std::time::{Duration, Instant};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Jobrelay-Signature";
pub const EVENT_HEADER: &str = "X-Jobrelay-Event";
pub const DELIVERY_HEADER: &str = "X-Jobrelay-Delivery";
pub const ATTEMPT_HEADER: &str = "X-Jobrelay-Attempt";

/// 计算请求体的 HMAC-SHA256 签名（十六进制）
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, HandlerError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| HandlerError::permanent(format!("invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 根据响应状态码判断失败类型
///
/// 408、429 与 5xx 视为暂时性失败，其余 4xx 视为永久失败
fn classify_status(status: StatusCode) -> Result<(), HandlerError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(HandlerError::transient(format!("endpoint returned {}", status)))
    } else {
        Err(HandlerError::permanent(format!("endpoint returned {}", status)))
    }
}

/// Webhook处理器
///
/// 处理 `webhook.post` 类型的作业：对负载签名后 POST 到目标地址
#[derive(Clone)]
pub struct WebhookHandler {
    /// Webhook 密钥
    secret: String,
    /// HTTP客户端
    client: Client,
    /// 请求超时
    timeout: Duration,
}

impl WebhookHandler {
    /// 创建新的Webhook处理器实例
    ///
    /// # 参数
    ///
    /// * `secret` - Webhook 密钥
    /// * `timeout` - 单次请求超时
    ///
    /// # 返回值
    ///
    /// 返回新的处理器实例，HTTP 客户端构建失败时返回错误
    pub fn new(secret: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("Jobrelay-Webhook/", env!("CARGO_PKG_VERSION"))),
        );
        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            secret,
            client,
            timeout,
        })
    }
}

#[async_trait]
impl JobHandler for WebhookHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let delivery = WebhookDelivery::from_bytes(&job.payload)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        let body = serde_json::to_vec(&delivery.body)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        let signature = sign(self.secret.as_bytes(), &body)?;

        info!("Delivering webhook {} to {}", job.id, delivery.url);
        counter!("webhook_delivery_attempts_total").increment(1);
        let start = Instant::now();

        let response = self
            .client
            .post(&delivery.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, delivery.event.as_str())
            .header(DELIVERY_HEADER, job.id.to_string())
            .header(ATTEMPT_HEADER, job.attempts.to_string())
            .body(body)
            .timeout(self.timeout)
            .send()
            .await;

        histogram!("webhook_delivery_duration_seconds").record(start.elapsed().as_secs_f64());

        let response = response.map_err(|e| {
            warn!("Webhook {} delivery failed with error: {}", job.id, e);
            counter!("webhook_delivery_failed_total", "reason" => "network_error").increment(1);
            HandlerError::from(e)
        })?;

        classify_status(response.status()).inspect_err(|_| {
            warn!(
                "Webhook {} delivery failed with status: {}",
                job.id,
                response.status()
            );
            counter!("webhook_delivery_failed_total", "reason" => "http_error").increment(1);
        })
    }
}
