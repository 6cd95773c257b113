//! Service Bootstrap and Initialization
//!
//! This module handles service initialization including:
//! - Command-line arguments
//! - Logging configuration
//! - Configuration validation
//!
//! Uses common bootstrap utilities for shared functionality

use clap::Parser;
use tracing::{debug, info, warn};

use crate::core::config::{ApiConfig, LoggingConfig, ResolverState, SatProxyConfig};
use crate::error::{Result, SatProxyError};
use common::service_bootstrap::ServiceInfo;

pub use common::bootstrap_args::ServiceArgs;

/// Command-line arguments for satproxy
#[derive(Parser, Clone, Debug)]
#[command(
    name = "satproxy",
    version = env!("CARGO_PKG_VERSION"),
    about = "Satellite Modbus Proxy",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(
        short = 'c',
        long,
        default_value = crate::core::config::DEFAULT_CONFIG_PATH,
        env = "SATPROXY_CONFIG"
    )]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Bind address for API server
    #[arg(short = 'b', long)]
    pub bind_address: Option<String>,

    /// Enable debug mode
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            config: args.config,
            log_level: args.log_level,
            bind_address: args.bind_address,
            debug: args.debug,
            no_color: args.no_color,
            validate: args.validate,
        }
    }
}

/// Initialize logging system with command-line arguments
///
/// Log directory priority:
/// 1. SATPROXY_LOG_DIR environment variable
/// 2. logging.dir from the YAML config
/// 3. Default "logs"
pub fn initialize_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    logging: &LoggingConfig,
) -> Result<()> {
    let level = args.console_level(&logging.level);
    common::service_bootstrap::init_logging(
        service_info,
        level,
        Some(logging.dir.as_str()),
        logging.enable_file,
        !args.no_color,
    )
    .map_err(|e| SatProxyError::config(format!("Failed to init logging: {}", e)))
}

/// Validate configuration: resolve every template and build every register map
pub fn validate_configuration(config: &SatProxyConfig) -> Result<ResolverState> {
    debug!("Validating configuration");

    let state = ResolverState::from_config(config)?;
    info!("Service: {}", config.service.name);
    info!("Found {} outstation(s)", state.len());

    for id in state.ids() {
        let context = state.resolve(&id)?;
        info!(
            "  Outstation {}: unit {} on {} ({} registers{})",
            id,
            context.unit_id(),
            context.listen,
            context.map.len(),
            if context.writable { ", writable" } else { "" }
        );
    }

    if state.is_empty() {
        warn!("No outstations configured; Modbus listeners will not start");
    }

    info!("Configuration validation completed successfully");
    Ok(state)
}

/// Determine bind address for the HTTP bridge
/// Priority: CLI > Config
pub fn determine_bind_address(cli_arg: Option<String>, api: &ApiConfig) -> String {
    if let Some(addr) = cli_arg {
        info!("Using bind address from command line: {}", addr);
        return addr;
    }

    let addr = api.bind_address();
    debug!("Using bind address from configuration: {}", addr);
    addr
}
