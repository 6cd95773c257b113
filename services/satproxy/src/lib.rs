//! Satellite Modbus proxy
//!
//! Stands in for remote outstations that report over a low-bandwidth
//! satellite link: compact payloads are decoded, reconciled into a register
//! store, and served to SCADA masters over Modbus TCP.
//!
//! # Layout
//!
//! - `core::config`: YAML configuration, config.dat templates, context resolver
//! - `core::ingest`: payload decoder, reconciliation engine, ingest pipeline
//! - `protocols::modbus`: Modbus server adapter, MBAP codec, TCP server
//! - `api`: HTTP bridge for the cloud edge collaborator

pub mod api;
pub mod app_state;
pub mod core;
pub mod error;
pub mod protocols;
pub mod routes;
pub mod runtime;

pub use app_state::{AppState, ReloadSummary};
pub use common::shutdown::wait_for_shutdown;
pub use error::{Result, SatProxyError};
pub use runtime::{shutdown_services, spawn_reload_task, start_proxy_services};
