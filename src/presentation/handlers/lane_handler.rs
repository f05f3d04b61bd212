// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::presentation::errors::AppError;
use crate::workers::dispatcher::{Dispatcher, TickReport};
use axum::{
    extract::{Extension, Path},
    Json,
};
use std::sync::Arc;

/// 所有通道的通配名
pub const ALL_LANES: &str = "*";

/// 立即处理一个通道
///
/// 与周期触发共用同一个 tick，已有 tick 在执行时返回 `skipped = true`
///
/// # 参数
///
/// * `lane` - 通道名，`*` 表示所有通道
///
/// # 返回值
///
/// 返回每个被处理通道的 tick 报告
pub async fn tick_lane(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Path(lane): Path<String>,
) -> Result<Json<Vec<TickReport>>, AppError> {
    let reports = if lane == ALL_LANES {
        dispatcher.tick_all().await?
    } else {
        vec![dispatcher.tick(&lane).await?]
    };
    Ok(Json(reports))
}
