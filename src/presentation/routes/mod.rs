// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::job_repository::JobRepository;
use crate::presentation::handlers::{job_handler, lane_handler, parent_handler};
use crate::presentation::middleware::auth_middleware::{auth_middleware, AuthState};
use crate::queue::immediate::ImmediateDelivery;
use crate::queue::job_queue::DatabaseJobQueue;
use crate::workers::dispatcher::Dispatcher;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// 管理接口依赖的服务
#[derive(Clone)]
pub struct AdminServices {
    pub queue: Arc<DatabaseJobQueue>,
    pub immediate: Arc<ImmediateDelivery>,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<dyn JobRepository>,
    pub auth: AuthState,
}

/// 创建应用路由
///
/// # 返回值
///
/// 返回未挂载依赖的路由
pub fn routes() -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let admin_routes = Router::new()
        .route("/v1/jobs", post(job_handler::enqueue_job))
        .route("/v1/jobs/purge", post(job_handler::purge_jobs))
        .route(
            "/v1/jobs/{id}",
            get(job_handler::get_job).delete(job_handler::cancel_job),
        )
        .route("/v1/lanes/{lane}/tick", post(lane_handler::tick_lane))
        .route(
            "/v1/parents/{entity_type}/{entity_id}/status",
            get(parent_handler::get_parent_status),
        );

    Router::new().merge(public_routes).merge(admin_routes)
}

/// 创建挂载了依赖、认证和请求追踪的完整应用
pub fn app(services: AdminServices) -> Router {
    routes()
        .layer(axum::middleware::from_fn_with_state(
            services.auth.clone(),
            auth_middleware,
        ))
        .layer(Extension(services.queue))
        .layer(Extension(services.immediate))
        .layer(Extension(services.dispatcher))
        .layer(Extension(services.jobs))
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
///
/// # 返回值
///
/// 返回应用版本号
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
