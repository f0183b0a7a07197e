use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("configuration not found")]
    ConfigurationNotFound,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("bad request")]
    JsonBadRequest(Value),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::JsonBadRequest(payload) => {
                tracing::error!(payload = ?payload, "json bad request");
                (StatusCode::BAD_REQUEST, Json(payload)).into_response()
            }
            other => {
                let status = match &other {
                    AppError::NotFound => StatusCode::NOT_FOUND,
                    AppError::Unauthorized => StatusCode::UNAUTHORIZED,
                    AppError::Forbidden => StatusCode::FORBIDDEN,
                    AppError::BadRequest(_)
                    | AppError::ConfigurationNotFound
                    | AppError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
                    AppError::Conflict(_) => StatusCode::CONFLICT,
                    AppError::Db(_)
                    | AppError::Platform(_)
                    | AppError::Internal(_)
                    | AppError::JsonBadRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                tracing::error!(error = ?other, "request failed");
                (status, other.to_string()).into_response()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
