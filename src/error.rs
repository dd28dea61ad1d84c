// HTTP API Error Types
use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::database::DatabaseError;
use crate::tenant::TenantError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),

    // 408 Request Timeout
    RequestTimeout,

    // Tenant resolution and enforcement; carries its own status and code
    Tenant(TenantError),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::RequestTimeout => 408,
            ApiError::Tenant(err) => err.status_code(),
        }
    }

    /// Get client-safe error message. Server-side failures never echo
    /// their internals to the client.
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::InvalidJson(msg) => msg.clone(),
            ApiError::RequestTimeout => "Request timed out".to_string(),
            ApiError::Tenant(err) if err.is_defect() => "Internal server error".to_string(),
            ApiError::Tenant(TenantError::Database(db)) => match db.status_code() {
                503 => "Database temporarily unavailable".to_string(),
                s if s >= 500 => "An error occurred while processing your request".to_string(),
                _ => db.to_string(),
            },
            ApiError::Tenant(err) => err.to_string(),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "error": self.message(),
            "code": self.error_code()
        })
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::RequestTimeout => "REQUEST_TIMEOUT",
            ApiError::Tenant(TenantError::Database(db)) => match db.status_code() {
                404 => "NOT_FOUND",
                409 => "CONFLICT",
                503 => "SERVICE_UNAVAILABLE",
                _ => "INTERNAL_SERVER_ERROR",
            },
            ApiError::Tenant(err) => err.code(),
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }
}

// Convert other error types to ApiError
impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match &err {
            TenantError::Database(db) if db.status_code() >= 500 => {
                tracing::error!("Database error: {}", db);
            }
            e if e.is_defect() => {
                tracing::error!(code = e.code(), "Tenant enforcement defect: {}", e);
            }
            _ => {}
        }
        ApiError::Tenant(err)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        TenantError::Database(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_json(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
