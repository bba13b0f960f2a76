//! HTTP error responses for the records API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid record id '{id}'")]
    InvalidId { id: String },

    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    #[error("Record {id} not found")]
    NotFound { id: i64 },

    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },
}

impl ApiError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidId { .. } | ApiError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidId { .. } => "INVALID_ID",
            ApiError::InvalidBody { .. } => "INVALID_BODY",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Database { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn error_hint(&self) -> Option<&'static str> {
        match self {
            ApiError::InvalidId { .. } => Some("Record ids are positive integers"),
            ApiError::InvalidBody { .. } => Some("Send a JSON object with name and phone"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Driver details stay in the log
        let message = match &self {
            ApiError::Database { source } => {
                tracing::error!(error = %source, "Database request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": message,
                "hint": self.error_hint()
            }
        });

        (status, Json(body)).into_response()
    }
}
