// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// 认证状态
#[derive(Clone, Default)]
pub struct AuthState {
    /// 管理令牌，为空时所有请求放行
    pub admin_token: Option<Arc<str>>,
}

impl AuthState {
    pub fn new(admin_token: Option<String>) -> Self {
        Self {
            admin_token: admin_token
                .filter(|token| !token.is_empty())
                .map(Arc::from),
        }
    }
}

/// 认证中间件
///
/// 校验 `Authorization: Bearer <token>` 与配置的管理令牌一致
///
/// # 参数
///
/// * `state` - 认证状态
/// * `req` - HTTP请求
/// * `next` - 下一个中间件
///
/// # 返回值
///
/// * `Ok(Response)` - 认证成功的响应
/// * `Err(StatusCode)` - 认证失败的状态码
pub async fn auth_middleware(
    State(state): State<AuthState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    debug!("AuthMiddleware processing path: {}", path);
    if path == "/health" || path == "/v1/version" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token != expected {
        warn!("Rejected admin request with invalid token on {}", path);
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}
