//! HTTP bridge response envelope
//!
//! Every handler answers `{"success": true, "data": ..}` or
//! `{"success": false, "error": {..}}` so the cloud side parses one shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use errors::ErrorInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
    /// Paging totals and similar; omitted when empty
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorInfo,
}

/// Overall service status reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    /// Serving, but at least one outstation is stale
    Degraded,
    Unhealthy,
}

// ============================================================================
// AppError (axum feature)
// ============================================================================

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Handler error carrying its HTTP status
#[cfg(feature = "axum")]
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub error: ErrorInfo,
}

#[cfg(feature = "axum")]
impl AppError {
    pub fn new(status: StatusCode, error: ErrorInfo) -> Self {
        Self { status, error }
    }

    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, ErrorInfo::new(message).with_code(status.as_u16()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.error,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(feature = "axum")]
impl From<errors::ProxyError> for AppError {
    fn from(err: errors::ProxyError) -> Self {
        let info = err.to_error_info();
        let status =
            StatusCode::from_u16(info.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, info)
    }
}
