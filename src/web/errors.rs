//! # Web API Errors
//!
//! Every handler error is rendered as `{"error": {"code": ..., "message": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::constraints::ConstraintError;
use crate::error::EngineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Unprocessable request: {message}")]
    Unprocessable { message: String },

    #[error("Rejected by constraint: {message}")]
    Vetoed { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Vetoed { .. } => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Unprocessable { .. } => "INVALID_STATE",
            Self::Vetoed { .. } => "CONSTRAINT_VIOLATION",
            Self::Conflict { .. } => "CONFLICT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let message = error.to_string();
        match error {
            EngineError::NotFound { .. } => Self::NotFound { message },
            EngineError::InvalidFormationState { .. } => Self::Unprocessable { message },
            EngineError::InvalidStatusReport(_)
            | EngineError::InvalidInput(_)
            | EngineError::Template(_) => Self::BadRequest { message },
            EngineError::Constraint(
                ConstraintError::InvalidInput { .. } | ConstraintError::UnsupportedJoinPoint { .. },
            ) => Self::BadRequest { message },
            EngineError::ConstraintViolation { .. } => Self::Vetoed { message },
            EngineError::Conflict(_) => Self::Conflict { message },
            EngineError::Store(StoreError::NotFound { .. }) => Self::NotFound { message },
            EngineError::Store(
                StoreError::AlreadyExists { .. } | StoreError::ConcurrentModification { .. },
            ) => Self::Conflict { message },
            _ => Self::Internal { message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
