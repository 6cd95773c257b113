//! Configuration loading and the context resolver

pub mod resolver;
pub mod template;
pub mod types;

pub use resolver::{ContextResolver, OutstationContext, ResolverState};
pub use template::{load_template, parse_template, OutstationTemplate};
pub use types::{
    ApiConfig, IngestConfig, LoggingConfig, ModbusConfig, OutstationConfig, RegisterConfig,
    SatProxyConfig, ServiceConfig, StoreConfig, DEFAULT_API_PORT, DEFAULT_CONFIG_PATH,
};
