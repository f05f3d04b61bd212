// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::job_repository::RepositoryError;
use crate::domain::services::completion_service::CompletionError;
use thiserror::Error;

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("仓库错误: {0}")]
    RepositoryError(#[from] RepositoryError),

    #[error("对账错误: {0}")]
    CompletionError(#[from] CompletionError),
}
