// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 独立迁移工具入口
///
/// 通过 `DATABASE_URL` 对 jobs 与 parent_completions 表执行 up/down/status
#[async_std::main]
async fn main() {
    cli::run_cli(migration::Migrator).await;
}
