//! Shared service plumbing for the satellite Modbus proxy
//!
//! - logging with a runtime-adjustable filter
//! - shutdown and reload signals
//! - startup arguments and banner
//! - the HTTP response envelope

pub mod api_types;
pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use api_types::{ErrorInfo, ErrorResponse, ServiceStatus, SuccessResponse};

#[cfg(feature = "axum")]
pub use api_types::AppError;

pub use bootstrap_args::ServiceArgs;
