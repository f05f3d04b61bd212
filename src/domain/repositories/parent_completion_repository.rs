// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::job_repository::RepositoryError;
use crate::domain::models::parent::{ParentRef, ParentSummary};
use async_trait::async_trait;

/// 父实体完成记录仓库特质
///
/// 每个父实体至多一条记录，记录存在即表示父实体已进入终态
#[async_trait]
pub trait ParentCompletionRepository: Send + Sync {
    /// 插入完成记录
    ///
    /// # 返回值
    ///
    /// 首次插入返回 `true`，记录已存在返回 `false`
    async fn insert_if_absent(&self, summary: &ParentSummary) -> Result<bool, RepositoryError>;

    /// 查找完成记录
    async fn find(&self, parent: &ParentRef) -> Result<Option<ParentSummary>, RepositoryError>;

    /// 删除完成记录，使下一次对账重新尝试
    async fn remove(&self, parent: &ParentRef) -> Result<(), RepositoryError>;
}
