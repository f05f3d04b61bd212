// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 该模块定义了领域层的仓库接口，具体实现由基础设施层提供。
///
/// 包含的仓库接口：
/// - 作业仓库（job_repository）：作业的入队、认领、状态变更与保留清理
/// - 父实体完成仓库（parent_completion_repository）：父实体的终态记录
pub mod job_repository;
pub mod parent_completion_repository;
