// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::repositories::job_repository::RepositoryError;
use crate::queue::job_queue::QueueError;
use crate::workers::dispatcher::DispatchError;

/// 请求层错误
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<ApiError>() {
            return match err {
                ApiError::NotFound(_) => StatusCode::NOT_FOUND,
                ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
                ApiError::Conflict(_) => StatusCode::CONFLICT,
            };
        }

        if self.0.downcast_ref::<validator::ValidationErrors>().is_some() {
            return StatusCode::BAD_REQUEST;
        }

        if let Some(DispatchError::UnknownLane(_)) = self.0.downcast_ref::<DispatchError>() {
            return StatusCode::NOT_FOUND;
        }

        let repository_error = match self.0.downcast_ref::<QueueError>() {
            Some(QueueError::Validation(_)) | Some(QueueError::InvalidPayload(_)) => {
                return StatusCode::BAD_REQUEST
            }
            Some(QueueError::Repository(err)) => Some(err),
            _ => self.0.downcast_ref::<RepositoryError>(),
        };

        match repository_error {
            Some(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            Some(RepositoryError::Conflict(_)) | Some(RepositoryError::Duplicate(_)) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.0);
        }

        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
