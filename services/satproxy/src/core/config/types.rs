//! Service configuration
//!
//! Loaded from `satproxy.yaml` with figment, then overridden by `SATPROXY_`
//! environment variables (`__` separates nesting levels, e.g.
//! `SATPROXY_STORE__STALE_AFTER_SECS=600`).

use crate::error::{Result, SatProxyError};
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use satproxy_model::{ByteOrder, DataType, DeviceIdentity, RegisterKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/satproxy.yaml";
pub const DEFAULT_API_PORT: u16 = 6010;
pub const ENV_PREFIX: &str = "SATPROXY_";

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "satproxy".to_string(),
        }
    }
}

/// HTTP bridge listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus TCP server settings, shared by every listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Concurrent master connections per listener
    pub max_connections: usize,
    /// Idle time after which a master connection is closed
    pub request_timeout_ms: u64,
    /// Interval of the staleness heartbeat log; 0 disables it
    pub heartbeat_secs: u64,
    /// Queued writes kept per outstation until the cloud side drains them
    pub write_queue_capacity: usize,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            request_timeout_ms: 30_000,
            heartbeat_secs: 30,
            write_queue_capacity: 64,
        }
    }
}

impl ModbusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Register store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Silence after which values are reported stale; 0 disables staleness
    pub stale_after_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 900,
        }
    }
}

impl StoreConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

/// Satellite ingest settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Largest accepted payload in bytes
    pub max_frame_len: usize,
    /// Payloads for unknown outstations kept for replay after a reload
    pub parked_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 1024,
            parked_capacity: 256,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub enable_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            enable_file: false,
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Inline register definition in the YAML file
///
/// Addresses are zero-based protocol addresses. The compact index is the
/// position after any template registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    #[serde(default)]
    pub param_id: Option<u32>,
    #[serde(rename = "type", alias = "kind", alias = "register_type")]
    pub kind: RegisterKind,
    pub address: u16,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub label: String,
}

/// One remote outstation and the Modbus endpoint that impersonates it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstationConfig {
    /// Stable identifier (terminal or mobile id)
    pub id: String,
    /// Modbus TCP listen address, e.g. `0.0.0.0:5020`
    pub listen: String,
    /// Overrides the template's `networkId`
    #[serde(default)]
    pub unit_id: Option<u8>,
    /// Accept Modbus writes and queue them for the cloud side
    #[serde(default)]
    pub writable: bool,
    /// `config.dat` template, relative to the YAML file
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,
    /// Overrides the template's `/*DEVICE` line
    #[serde(default)]
    pub identity: Option<DeviceIdentity>,
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SatProxyConfig {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub modbus: ModbusConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
    pub outstations: Vec<OutstationConfig>,

    /// Directory that relative template paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl SatProxyConfig {
    /// Load the YAML file and environment overrides
    ///
    /// A missing file is not an error: defaults apply and the proxy starts
    /// with no outstations.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::new();

        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            figment = figment.merge(Yaml::file(path));
        } else {
            warn!("Config file {} not found, using defaults", path.display());
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: SatProxyConfig = figment.extract()?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document directly (no environment overrides)
    pub fn from_yaml_str(yaml: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: SatProxyConfig = serde_yaml::from_str(yaml)?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not need the register templates
    pub fn validate(&self) -> Result<()> {
        if self.modbus.max_connections == 0 {
            return Err(SatProxyError::config("modbus.max_connections must be > 0"));
        }
        if self.modbus.write_queue_capacity == 0 {
            return Err(SatProxyError::config(
                "modbus.write_queue_capacity must be > 0",
            ));
        }
        if self.ingest.max_frame_len < 12 {
            return Err(SatProxyError::config(
                "ingest.max_frame_len is smaller than an empty frame",
            ));
        }

        let mut ids = HashSet::new();
        for outstation in &self.outstations {
            if outstation.id.trim().is_empty() {
                return Err(SatProxyError::inconsistent("outstation with empty id"));
            }
            if !ids.insert(outstation.id.as_str()) {
                return Err(SatProxyError::inconsistent(format!(
                    "duplicate outstation id '{}'",
                    outstation.id
                )));
            }
        }
        Ok(())
    }

    pub fn template_path(&self, template: &Path) -> PathBuf {
        if template.is_absolute() {
            template.to_path_buf()
        } else {
            self.base_dir.join(template)
        }
    }
}
