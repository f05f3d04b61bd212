// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 速率限制服务（rate_limiting_service）：按作业类型的固定窗口上限
/// - 完成跟踪服务（completion_service）：父实体对账与一次性终态回调
pub mod completion_service;
pub mod rate_limiting_service;
