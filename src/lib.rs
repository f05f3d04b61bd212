// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 管理接口的请求与响应结构
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含作业、父实体、通道等核心实体，以及仓库接口和领域服务
pub mod domain;

/// 处理器模块
///
/// 作业类型到处理器的注册表，以及内置的 Webhook 处理器
pub mod handlers;

/// 基础设施模块
///
/// 提供数据库、仓库实现和指标导出
pub mod infrastructure;

/// 表示层模块
///
/// 处理HTTP请求和响应，包括路由、处理器和中间件
pub mod presentation;

/// 队列模块
///
/// 入队接口、立即投递和通道调度
pub mod queue;

/// 工具模块
///
/// 提供退避策略、错误类型和日志初始化
pub mod utils;

/// 工作器模块
///
/// 调度器、保留维护和后台任务管理
pub mod workers;
