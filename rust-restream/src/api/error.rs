//! API error handling.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;
use crate::orchestrator::LaunchError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422 Unprocessable Entity.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{} with id '{}' not found", entity_type, id))
            }
            Error::Validation(msg) => ApiError::validation(msg),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::InvalidState { .. } => ApiError::conflict(err.to_string()),
            Error::ShuttingDown => ApiError::service_unavailable(err.to_string()),
            Error::Launch(LaunchError::SourceNotFound { reference }) => {
                ApiError::not_found(format!("source video '{}' not found", reference))
            }
            Error::Launch(e) => ApiError::service_unavailable(e.to_string()),
            Error::DatabaseSqlx(_) | Error::Database(_) | Error::Migration(_) => {
                tracing::error!("Database error: {}", err);
                ApiError::internal("Database error occurred")
            }
            Error::Io(_) | Error::IoPath { .. } => {
                tracing::error!("IO error: {}", err);
                ApiError::internal("IO error occurred")
            }
            Error::ApiError(msg) => ApiError::bad_request(msg),
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::not_found("StreamJob", "123"), StatusCode::NOT_FOUND)]
    #[case(Error::validation("missing title"), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(Error::invalid_state("1", "RUNNING", "delete"), StatusCode::CONFLICT)]
    #[case(Error::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE)]
    #[case(Error::Database("boom".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_mapping(#[case] err: Error, #[case] status: StatusCode) {
        let api_err: ApiError = err.into();
        assert_eq!(api_err.status, status);
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let api_err: ApiError = Error::Database("secret table name".into()).into();
        assert!(!api_err.message.contains("secret"));
    }
}
