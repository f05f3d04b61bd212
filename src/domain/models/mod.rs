// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了队列的核心业务实体，包括：
/// - 作业（job）：发往外部系统的单个工作单元及其状态
/// - 父实体（parent）：一组作业所属的业务实体与完成摘要
/// - 负载（payload）：各作业类型的强类型负载
/// - 通道（lane）：每条队列的节奏、重试与速率配置
pub mod job;
pub mod lane;
pub mod parent;
pub mod payload;
