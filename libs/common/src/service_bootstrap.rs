//! Startup banner and logging entry point for proxy binaries

use crate::logging::{self, LogConfig};
use std::path::PathBuf;
use tracing::{info, Level};

pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// HTTP bridge port when the configuration names none
    pub default_port: u16,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, default_port: u16) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
            default_port,
        }
    }

    /// Override the version (binaries pass their own CARGO_PKG_VERSION)
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ███████╗ █████╗ ████████╗██████╗ ██████╗  ██████╗ ██╗  ██╗██╗   ██╗
 ██╔════╝██╔══██╗╚══██╔══╝██╔══██╗██╔══██╗██╔═══██╗╚██╗██╔╝╚██╗ ██╔╝
 ███████╗███████║   ██║   ██████╔╝██████╔╝██║   ██║ ╚███╔╝  ╚████╔╝
 ╚════██║██╔══██║   ██║   ██╔═══╝ ██╔══██╗██║   ██║ ██╔██╗   ╚██╔╝
 ███████║██║  ██║   ██║   ██║     ██║  ██║╚██████╔╝██╔╝ ██╗   ██║
 ╚══════╝╚═╝  ╚═╝   ╚═╝   ╚═╝     ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝   ╚═╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
    info!("");
}

/// Initialize logging for a proxy binary.
///
/// Log directory priority:
/// 1. `SATPROXY_LOG_DIR` environment variable
/// 2. `log_dir` argument (from the YAML config)
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    level: Level,
    log_dir: Option<&str>,
    enable_file: bool,
    ansi: bool,
) -> anyhow::Result<()> {
    let log_dir = std::env::var("SATPROXY_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(log_dir.unwrap_or("logs")));

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir,
        console_level: level,
        enable_file,
        ansi,
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("satproxy", "Satellite Modbus proxy", 6010);
        assert_eq!(service.name, "satproxy");
        assert_eq!(service.description, "Satellite Modbus proxy");
        assert_eq!(service.default_port, 6010);

        let service = service.with_version("9.9.9");
        assert_eq!(service.version, "9.9.9");
    }
}
