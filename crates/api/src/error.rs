//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mcpgw_routing::RoutingError;
use mcpgw_shared::StoreError;
use serde::Serialize;
use serde_json::json;

use crate::mcp::UpstreamError;
use crate::tools::ToolError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid or expired API key")]
    InvalidApiKey,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

/// Code and message of an error response, attached as a response extension
/// so the trace middleware can rebuild the body with the request's trace id.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

impl ErrorDetail {
    pub fn body(&self, trace_id: Option<&str>) -> serde_json::Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
            },
            "trace_id": trace_id,
        })
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound | ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let (code, message) = match self {
            // Authentication
            ApiError::Unauthorized => ("UNAUTHORIZED", self.to_string()),
            ApiError::InvalidApiKey => ("INVALID_API_KEY", self.to_string()),

            // Validation
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => ("NOT_FOUND", self.to_string()),
            ApiError::SessionNotFound => ("SESSION_NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => ("CONFLICT", msg.clone()),

            // Internal: never leak store details
            ApiError::Database(_) => ("DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => ("INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => ("SERVICE_UNAVAILABLE", self.to_string()),
        };
        ErrorDetail { code, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self.detail();
        let mut response = (self.status(), Json(detail.body(None))).into_response();
        response.extensions_mut().insert(detail);
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Conflict(constraint) => {
                tracing::debug!(constraint = %constraint, "Unique constraint violated");
                ApiError::Conflict("Resource already exists".to_string())
            }
            StoreError::Timeout => {
                tracing::error!("Database pool timed out");
                ApiError::ServiceUnavailable
            }
            StoreError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                ApiError::Database(msg)
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

impl From<RoutingError> for ApiError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::Store(store) => store.into(),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArguments(msg) => ApiError::BadRequest(msg),
            ToolError::NotFound => ApiError::NotFound,
            ToolError::Conflict(msg) => ApiError::Conflict(msg),
            ToolError::Store(store) => store.into(),
        }
    }
}

/// Only lookups reach HTTP handlers; relay failures travel as JSON-RPC errors
impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => ApiError::NotFound,
            UpstreamError::Store(msg) => ApiError::Database(msg),
            other => {
                tracing::warn!(error = %other, "Unexpected upstream error outside relay");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
