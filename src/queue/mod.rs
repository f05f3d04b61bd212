// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供作业入队、状态查询、立即投递以及通道的周期触发
pub mod immediate;
pub mod job_queue;
pub mod scheduler;
