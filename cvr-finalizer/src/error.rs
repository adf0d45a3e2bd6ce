//! Error types for cvr-finalizer
//!
//! Client input errors and authorization errors are answered synchronously.
//! Pipeline failures reached through the fire-and-forget path only ever
//! show up in logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cvr_common::api::{ApiAuthError, ErrorBody};
use serde_json::json;
use thiserror::Error;

use crate::services::dispatcher::DispatchError;
use crate::services::pipeline::PipelineError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or wrong internal credential (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Server misconfiguration (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// cvr-common error
    #[error("Common error: {0}")]
    Common(#[from] cvr_common::Error),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            DispatchError::SecretNotConfigured => ApiError::Config(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(id) => {
                ApiError::NotFound(format!("Conversation response not found: {}", id))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ApiAuthError> for ApiError {
    fn from(err: ApiAuthError) -> Self {
        match err {
            ApiAuthError::NotConfigured => ApiError::Config(err.to_string()),
            ApiAuthError::MissingCredential | ApiAuthError::InvalidCredential => {
                ApiError::Unauthorized(err.to_string())
            }
        }
    }
}

impl ApiError {
    /// HTTP status and stable machine-readable code
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Common(cvr_common::Error::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Common(err) if err.is_client_error() => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Common(cvr_common::Error::CorruptRecord { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CORRUPT_RECORD")
            }
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        }
    }

    /// Text sent to the caller; wrapped common errors drop their prefix
    fn message(self) -> String {
        match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Config(msg)
            | ApiError::Internal(msg) => msg,
            ApiError::Common(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }

        let body = ErrorBody {
            code: code.to_string(),
            message: self.message(),
        };
        (status, Json(json!({ "error": body }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
