//! Error handling for the satellite proxy service
//!
//! Ingest errors never unwind past the message that caused them and serve
//! errors become Modbus exceptions, so most variants end up as counters and
//! log lines rather than failed tasks.

use crate::core::ingest::wire::MalformedReason;
use errors::ProxyError;
use thiserror::Error;

/// Satellite proxy error type
#[derive(Error, Debug, Clone)]
pub enum SatProxyError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The register map contradicts itself; fatal at startup
    #[error("Configuration inconsistent: {0}")]
    ConfigurationInconsistent(String),

    /// Structural or integrity failure of a satellite payload
    #[error("Malformed payload: {0}")]
    MalformedPayload(MalformedReason),

    /// Outstation id absent from the configuration
    #[error("Unknown outstation: {0}")]
    UnknownOutstation(String),

    /// Per-field ordering rejection
    #[error("Stale or duplicate update for {outstation} index {index}")]
    StaleOrDuplicateUpdate { outstation: String, index: u32 },

    /// Address outside the configured register map
    #[error("Unresolved address: {0}")]
    UnresolvedAddress(String),

    /// Configured register with no value yet
    #[error("No data yet: {0}")]
    NoDataYet(String),

    /// Value exists but the outstation has been silent too long
    #[error("Stale data: {0}")]
    StaleData(String),

    /// Modbus framing or protocol errors
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Invalid request parameters
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Queue or connection limits reached
    #[error("Resource error: {0}")]
    ResourceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the satellite proxy service
pub type Result<T> = std::result::Result<T, SatProxyError>;

impl SatProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        SatProxyError::ConfigError(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        SatProxyError::ConfigurationInconsistent(msg.into())
    }

    pub fn unknown_outstation(id: impl Into<String>) -> Self {
        SatProxyError::UnknownOutstation(id.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        SatProxyError::ProtocolError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        SatProxyError::IoError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        SatProxyError::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        SatProxyError::NotFound(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        SatProxyError::ResourceError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SatProxyError::InternalError(msg.into())
    }

    /// Whether ingestion can simply continue with the next message
    pub fn is_recoverable_ingest(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload(_)
                | Self::UnknownOutstation(_)
                | Self::StaleOrDuplicateUpdate { .. }
        )
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<MalformedReason> for SatProxyError {
    fn from(reason: MalformedReason) -> Self {
        SatProxyError::MalformedPayload(reason)
    }
}

impl From<std::io::Error> for SatProxyError {
    fn from(err: std::io::Error) -> Self {
        SatProxyError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SatProxyError {
    fn from(err: serde_json::Error) -> Self {
        SatProxyError::ValidationError(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for SatProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        SatProxyError::ConfigError(format!("YAML: {err}"))
    }
}

impl From<figment::Error> for SatProxyError {
    fn from(err: figment::Error) -> Self {
        SatProxyError::ConfigError(err.to_string())
    }
}

impl From<satproxy_model::ModelError> for SatProxyError {
    fn from(err: satproxy_model::ModelError) -> Self {
        match err {
            satproxy_model::ModelError::Inconsistent { .. } => {
                SatProxyError::ConfigurationInconsistent(err.to_string())
            },
            other => SatProxyError::ConfigError(other.to_string()),
        }
    }
}

impl From<satproxy_rtdb::RtdbError> for SatProxyError {
    fn from(err: satproxy_rtdb::RtdbError) -> Self {
        use satproxy_rtdb::RtdbError;
        match err {
            RtdbError::OutstationNotFound(id) => SatProxyError::UnknownOutstation(id),
            RtdbError::ValueNotFound { outstation, index } => {
                SatProxyError::NoDataYet(format!("{outstation} index {index}"))
            },
            RtdbError::NoContact(id) => SatProxyError::NoDataYet(id),
        }
    }
}

// ============================================================================
// Conversion from SatProxyError to ProxyError for API boundaries
// ============================================================================

impl From<SatProxyError> for ProxyError {
    fn from(err: SatProxyError) -> Self {
        match err {
            SatProxyError::ConfigError(msg) => ProxyError::Configuration(msg),
            SatProxyError::ConfigurationInconsistent(msg) => {
                ProxyError::ConfigurationInconsistent(msg)
            },
            SatProxyError::MalformedPayload(reason) => {
                ProxyError::MalformedPayload(reason.to_string())
            },
            SatProxyError::UnknownOutstation(id) => ProxyError::UnknownOutstation(id),
            SatProxyError::StaleOrDuplicateUpdate { outstation, index } => {
                ProxyError::StaleOrDuplicateUpdate { outstation, index }
            },
            SatProxyError::UnresolvedAddress(msg) => ProxyError::UnresolvedAddress(msg),
            SatProxyError::NoDataYet(msg) => ProxyError::NoDataYet(msg),
            SatProxyError::StaleData(msg) => ProxyError::StaleData(msg),
            SatProxyError::ProtocolError(msg) => ProxyError::Protocol {
                protocol: "modbus".to_string(),
                message: msg,
            },
            SatProxyError::IoError(msg) => ProxyError::Io(std::io::Error::other(msg)),
            SatProxyError::ValidationError(msg) => ProxyError::Validation(msg),
            SatProxyError::NotFound(msg) => ProxyError::NotFound { resource: msg },
            SatProxyError::ResourceError(msg) => ProxyError::ResourceBusy(msg),
            SatProxyError::InternalError(msg) => ProxyError::Internal(msg),
        }
    }
}

// ============================================================================
// SatProxyError implements ProxyErrorTrait
// ============================================================================

use errors::{ErrorCategory, ProxyErrorTrait};

impl ProxyErrorTrait for SatProxyError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "SATPROXY_CONFIG_ERROR",
            Self::ConfigurationInconsistent(_) => "SATPROXY_CONFIG_INCONSISTENT",
            Self::MalformedPayload(_) => "SATPROXY_MALFORMED_PAYLOAD",
            Self::UnknownOutstation(_) => "SATPROXY_UNKNOWN_OUTSTATION",
            Self::StaleOrDuplicateUpdate { .. } => "SATPROXY_STALE_OR_DUPLICATE",
            Self::UnresolvedAddress(_) => "SATPROXY_UNRESOLVED_ADDRESS",
            Self::NoDataYet(_) => "SATPROXY_NO_DATA_YET",
            Self::StaleData(_) => "SATPROXY_STALE_DATA",
            Self::ProtocolError(_) => "SATPROXY_PROTOCOL_ERROR",
            Self::IoError(_) => "SATPROXY_IO_ERROR",
            Self::ValidationError(_) => "SATPROXY_VALIDATION_ERROR",
            Self::NotFound(_) => "SATPROXY_NOT_FOUND",
            Self::ResourceError(_) => "SATPROXY_RESOURCE_ERROR",
            Self::InternalError(_) => "SATPROXY_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::ConfigurationInconsistent(_) => ErrorCategory::Configuration,
            Self::MalformedPayload(_) => ErrorCategory::Ingest,
            Self::UnknownOutstation(_) => ErrorCategory::NotFound,
            Self::StaleOrDuplicateUpdate { .. } => ErrorCategory::Conflict,
            Self::UnresolvedAddress(_) => ErrorCategory::NotFound,
            Self::NoDataYet(_) => ErrorCategory::Unavailable,
            Self::StaleData(_) => ErrorCategory::Unavailable,
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::IoError(_) => ErrorCategory::Network,
            Self::ValidationError(_) => ErrorCategory::Validation,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::ResourceError(_) => ErrorCategory::ResourceBusy,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// API Adaptation: SatProxyError → AppError conversion
// ============================================================================

impl From<SatProxyError> for common::AppError {
    fn from(err: SatProxyError) -> Self {
        use common::{AppError, ErrorInfo};

        let status = err.http_status();
        let error_info = ErrorInfo::new(err.to_string())
            .with_code(status.as_u16())
            .with_details(format!(
                "error_code: {}, category: {:?}, retryable: {}",
                err.error_code(),
                err.category(),
                err.is_retryable()
            ));

        AppError::new(status, error_info)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            SatProxyError::MalformedPayload(MalformedReason::BadChecksum).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SatProxyError::unknown_outstation("Z9").http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SatProxyError::NoDataYet("A1 index 1".into()).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(SatProxyError::NoDataYet("A1".into()).is_retryable());
        assert!(!SatProxyError::inconsistent("overlap").is_retryable());
    }

    #[test]
    fn test_recoverable_ingest_errors() {
        assert!(SatProxyError::from(MalformedReason::Truncated).is_recoverable_ingest());
        assert!(SatProxyError::unknown_outstation("Z9").is_recoverable_ingest());
        assert!(!SatProxyError::config("missing file").is_recoverable_ingest());
    }

    #[test]
    fn test_model_inconsistency_maps_to_fatal_variant() {
        let err: SatProxyError = satproxy_model::ModelError::Inconsistent {
            outstation: "A1".into(),
            reason: "overlap".into(),
        }
        .into();
        assert!(matches!(err, SatProxyError::ConfigurationInconsistent(_)));
        assert_eq!(err.error_code(), "SATPROXY_CONFIG_INCONSISTENT");
    }

    #[test]
    fn test_into_proxy_error() {
        let err: ProxyError = SatProxyError::StaleOrDuplicateUpdate {
            outstation: "A1".into(),
            index: 0,
        }
        .into();
        assert_eq!(err.status_code(), 409);
    }
}
