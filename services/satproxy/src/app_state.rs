//! Application State Management
//!
//! Everything the HTTP bridge, the Modbus listeners and the reload path share.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::core::config::{ContextResolver, ResolverState, SatProxyConfig};
use crate::core::ingest::{IngestPipeline, PayloadDecoder, Reconciler, ReplaySummary};
use crate::error::{Result, SatProxyError};
use crate::protocols::modbus::{ModbusAdapter, ModbusServer, WriteQueue};
use satproxy_rtdb::{RegisterStore, SystemTimeProvider, TimeProvider};

/// Outcome of a configuration reload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadSummary {
    pub generation: u64,
    pub outstations: usize,
    /// Stored values dropped because their definition changed or vanished
    pub values_dropped: usize,
    pub replay: ReplaySummary,
    /// Configured listen addresses with no running listener until restart
    pub unbound_listeners: Vec<String>,
}

pub struct AppState {
    /// YAML file reloads read from; `None` when built from an in-memory config
    pub config_path: Option<PathBuf>,
    config: ArcSwap<SatProxyConfig>,
    pub resolver: Arc<ContextResolver>,
    pub store: Arc<RegisterStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub writes: Arc<WriteQueue>,
    pub adapter: Arc<ModbusAdapter>,
    pub modbus: Arc<ModbusServer>,
    pub started_at: DateTime<Utc>,
    bound_listeners: Mutex<BTreeSet<SocketAddr>>,
    reload_lock: Mutex<()>,
}

impl AppState {
    /// Build on the system clock
    pub fn new(config: SatProxyConfig, config_path: Option<PathBuf>) -> Result<Self> {
        Self::with_clock(config, config_path, Arc::new(SystemTimeProvider))
    }

    /// Build with an explicit clock; a self-contradictory register map is fatal
    pub fn with_clock(
        config: SatProxyConfig,
        config_path: Option<PathBuf>,
        clock: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        let resolver = Arc::new(ContextResolver::new(ResolverState::from_config(&config)?));
        let store = Arc::new(RegisterStore::new(config.store.stale_after(), clock));

        let decoder = PayloadDecoder::new(Arc::clone(&resolver), config.ingest.max_frame_len);
        let reconciler = Reconciler::new(Arc::clone(&resolver), Arc::clone(&store));
        let pipeline = Arc::new(IngestPipeline::new(
            decoder,
            reconciler,
            config.ingest.parked_capacity,
        ));

        let writes = Arc::new(WriteQueue::new(config.modbus.write_queue_capacity));
        let adapter = Arc::new(ModbusAdapter::new(
            Arc::clone(&resolver),
            Arc::clone(&store),
            Arc::clone(&writes),
        ));
        let modbus = Arc::new(ModbusServer::new(Arc::clone(&adapter), &config.modbus));

        info!(
            "Application state ready: {} outstations",
            resolver.load().len()
        );

        Ok(Self {
            config_path,
            config: ArcSwap::from_pointee(config),
            resolver,
            store,
            pipeline,
            writes,
            adapter,
            modbus,
            started_at: Utc::now(),
            bound_listeners: Mutex::new(BTreeSet::new()),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> Arc<SatProxyConfig> {
        self.config.load_full()
    }

    /// Listen addresses of the current mapping
    pub fn listen_addresses(&self) -> BTreeSet<SocketAddr> {
        self.resolver.load().listen_addresses()
    }

    /// Record which listen addresses have a running listener
    pub fn mark_bound(&self, addresses: impl IntoIterator<Item = SocketAddr>) {
        self.bound_listeners.lock().extend(addresses);
    }

    /// Re-read the configuration file and swap in its mapping
    pub fn reload(&self) -> Result<ReloadSummary> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| SatProxyError::config("no configuration file to reload from"))?;
        let config = SatProxyConfig::load(path).inspect_err(|e| {
            error!("Reload failed, keeping current mapping: {}", e);
        })?;
        self.reload_with(config)
    }

    /// Swap in the outstation mapping of `config`
    ///
    /// Only outstations, templates and registers are reloaded; listener,
    /// store and ingest limits keep their startup values. A failed build keeps
    /// the current mapping untouched.
    pub fn reload_with(&self, config: SatProxyConfig) -> Result<ReloadSummary> {
        let _guard = self.reload_lock.lock();

        let next = ResolverState::from_config(&config).inspect_err(|e| {
            error!("Reload failed, keeping current mapping: {}", e);
        })?;
        let previous = self.resolver.reload(next);
        let current = self.resolver.load();

        // No stored value may outlive its definition
        let mut values_dropped = 0;
        for id in previous.ids() {
            let Ok(old) = previous.resolve(&id) else {
                continue;
            };
            values_dropped += match current.resolve(&id) {
                Ok(new) => self.store.retain_mapped(&id, |index| {
                    match (old.map.by_index(index), new.map.by_index(index)) {
                        (Some(before), Some(after)) => before == after,
                        _ => false,
                    }
                }),
                Err(_) => self.store.retain_mapped(&id, |_| false),
            };
        }
        self.writes.retain(|id| current.contains(id));

        let bound = self.bound_listeners.lock().clone();
        let unbound_listeners: Vec<String> = current
            .listen_addresses()
            .difference(&bound)
            .map(ToString::to_string)
            .collect();
        if !bound.is_empty() && !unbound_listeners.is_empty() {
            warn!(
                "New listen addresses need a restart: {}",
                unbound_listeners.join(", ")
            );
        }

        self.config.store(Arc::new(config));
        let replay = self.pipeline.replay_parked();

        info!(
            "Configuration reloaded: generation {}, {} outstations, {} values dropped",
            current.generation(),
            current.len(),
            values_dropped
        );

        Ok(ReloadSummary {
            generation: current.generation(),
            outstations: current.len(),
            values_dropped,
            replay,
            unbound_listeners: if bound.is_empty() {
                Vec::new()
            } else {
                unbound_listeners
            },
        })
    }
}
