// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// 清理请求DTO
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PurgeRequestDto {
    /// 删除早于该天数进入终态的作业
    #[validate(range(min = 0, max = 3650))]
    pub older_than_days: u32,

    /// 仅清理指定通道
    pub lane: Option<String>,
}

/// 清理响应DTO
#[derive(Debug, Deserialize, Serialize)]
pub struct PurgeResponseDto {
    pub purged: u64,
}
