//! Startup arguments shared by proxy binaries
//!
//! A binary declares its own clap `Args` (so `--help` carries its name) and
//! converts into [`ServiceArgs`], which the bootstrap helpers consume.

#[cfg(feature = "cli")]
use clap::Parser;
use tracing::Level;

/// Level the CLI reports when the operator did not pass `--log-level`
pub const DEFAULT_CLI_LEVEL: &str = "info";

#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", clap(author, version, about))]
pub struct ServiceArgs {
    /// Configuration file (YAML)
    #[cfg_attr(
        feature = "cli",
        clap(short = 'c', long, default_value = "config/satproxy.yaml", env = "SATPROXY_CONFIG")
    )]
    pub config: String,

    /// Console log level
    #[cfg_attr(feature = "cli", clap(short = 'l', long, default_value = DEFAULT_CLI_LEVEL))]
    pub log_level: String,

    /// HTTP bridge bind address override, e.g. 127.0.0.1:6010
    #[cfg_attr(feature = "cli", clap(short = 'b', long))]
    pub bind_address: Option<String>,

    /// Force debug level
    #[cfg_attr(feature = "cli", clap(long))]
    pub debug: bool,

    /// Plain console output, no banner
    #[cfg_attr(feature = "cli", clap(long))]
    pub no_color: bool,

    /// Check the configuration and register maps, then exit
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            config: "config/satproxy.yaml".to_string(),
            log_level: DEFAULT_CLI_LEVEL.to_string(),
            bind_address: None,
            debug: false,
            no_color: false,
            validate: false,
        }
    }
}

/// Lenient level parsing; anything unrecognized is INFO
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl ServiceArgs {
    /// Console level for this run.
    ///
    /// `--debug` beats everything. A `--log-level` other than the default
    /// beats the configured level; otherwise `configured` (from the YAML
    /// `logging.level`) applies.
    pub fn console_level(&self, configured: &str) -> Level {
        if self.debug {
            return Level::DEBUG;
        }
        if self.log_level.eq_ignore_ascii_case(DEFAULT_CLI_LEVEL) {
            parse_level(configured)
        } else {
            parse_level(&self.log_level)
        }
    }
}
