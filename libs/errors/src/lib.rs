//! Workspace error taxonomy
//!
//! Each crate keeps its own error enum and converts into [`ProxyError`] at the
//! HTTP boundary. [`ProxyErrorTrait`] gives every error the same face: a
//! stable code, a category, retryability and an HTTP status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body of an API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// HTTP status
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// ProxyError
// ============================================================================

#[derive(Debug, Error)]
pub enum ProxyError {
    // Configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The register map contradicts itself; the engine must not start
    #[error("Configuration inconsistent: {0}")]
    ConfigurationInconsistent(String),

    // Satellite side
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown outstation: {0}")]
    UnknownOutstation(String),

    #[error("Stale or duplicate update for {outstation} index {index}")]
    StaleOrDuplicateUpdate { outstation: String, index: u32 },

    // Master side
    #[error("Unresolved address: {0}")]
    UnresolvedAddress(String),

    #[error("No data received yet for {0}")]
    NoDataYet(String),

    #[error("Data is stale for {0}")]
    StaleData(String),

    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    // Requests
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // System
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::Validation(_) | Self::MalformedPayload(_) => 400,
            Self::NotFound { .. } | Self::UnknownOutstation(_) | Self::UnresolvedAddress(_) => 404,
            Self::StaleOrDuplicateUpdate { .. } => 409,
            Self::Protocol { .. } => 502,
            Self::NoDataYet(_) | Self::StaleData(_) | Self::ResourceBusy(_) => 503,
            Self::Configuration(_)
            | Self::ConfigurationInconsistent(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.to_string()).with_code(self.status_code());
        match self {
            Self::Validation(msg) | Self::MalformedPayload(msg) => info.with_details(msg.clone()),
            _ => info,
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl ProxyErrorTrait for ProxyError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::ConfigurationInconsistent(_) => "CONFIG_INCONSISTENT",
            Self::MalformedPayload(_) => "INGEST_MALFORMED_PAYLOAD",
            Self::UnknownOutstation(_) => "INGEST_UNKNOWN_OUTSTATION",
            Self::StaleOrDuplicateUpdate { .. } => "INGEST_STALE_OR_DUPLICATE",
            Self::UnresolvedAddress(_) => "SERVE_UNRESOLVED_ADDRESS",
            Self::NoDataYet(_) => "SERVE_NO_DATA_YET",
            Self::StaleData(_) => "SERVE_STALE_DATA",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ResourceBusy(_) => "RESOURCE_BUSY",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "UNKNOWN_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::ConfigurationInconsistent(_) => ErrorCategory::DataCorruption,
            Self::MalformedPayload(_) => ErrorCategory::Ingest,
            Self::StaleOrDuplicateUpdate { .. } => ErrorCategory::Conflict,
            Self::UnknownOutstation(_) | Self::UnresolvedAddress(_) | Self::NotFound { .. } => {
                ErrorCategory::NotFound
            },
            Self::NoDataYet(_) | Self::StaleData(_) => ErrorCategory::Unavailable,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::ResourceBusy(_) => ErrorCategory::ResourceBusy,
            Self::BadRequest(_) | Self::Validation(_) => ErrorCategory::Validation,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Categories and the shared trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Validation,
    NotFound,
    Conflict,
    /// Bad bytes from the satellite link
    Ingest,
    Protocol,
    /// Register known but not servable right now
    Unavailable,
    Internal,
    ResourceBusy,
    DataCorruption,
    Unknown,
}

pub trait ProxyErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable code for API bodies and logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::ResourceBusy | ErrorCategory::Unavailable
        )
    }

    #[cfg(feature = "axum-support")]
    fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Validation | ErrorCategory::Ingest => {
                StatusCode::BAD_REQUEST
            },
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Network | ErrorCategory::ResourceBusy | ErrorCategory::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            ErrorCategory::Protocol => StatusCode::BAD_GATEWAY,
            ErrorCategory::Internal | ErrorCategory::DataCorruption | ErrorCategory::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}
