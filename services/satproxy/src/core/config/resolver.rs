//! Context resolver
//!
//! Maps outstation ids (ingest side) and `(listener, unit id)` pairs (Modbus
//! side) to immutable register maps. The whole mapping sits behind one
//! `ArcSwap`, so a reload is a single pointer swap and any caller that loaded
//! a state keeps it, unchanged, for the rest of its message or request.

use super::template::load_template;
use super::types::{OutstationConfig, SatProxyConfig};
use crate::error::{Result, SatProxyError};
use arc_swap::ArcSwap;
use satproxy_model::{DataType, RegisterDefinition, RegisterMap};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Register map plus the endpoint that serves it
#[derive(Debug)]
pub struct OutstationContext {
    pub map: RegisterMap,
    pub listen: SocketAddr,
    pub writable: bool,
}

impl OutstationContext {
    pub fn new(map: RegisterMap, listen: SocketAddr, writable: bool) -> Self {
        Self {
            map,
            listen,
            writable,
        }
    }

    pub fn id(&self) -> &str {
        self.map.outstation_id()
    }

    pub fn unit_id(&self) -> u8 {
        self.map.unit_id()
    }

    /// Build from one YAML entry, reading its template if any
    pub fn from_config(config: &OutstationConfig, root: &SatProxyConfig) -> Result<Self> {
        let listen: SocketAddr = config.listen.parse().map_err(|e| {
            SatProxyError::inconsistent(format!(
                "outstation '{}': invalid listen address '{}': {}",
                config.id, config.listen, e
            ))
        })?;

        let template = match &config.template {
            Some(path) => {
                let path = root.template_path(path);
                debug!("Outstation {}: loading template {}", config.id, path.display());
                Some(load_template(&path)?)
            },
            None => None,
        };

        let (mut definitions, template_unit, identity) = match template {
            Some(t) => (t.registers, t.unit_id, t.identity),
            None => (Vec::new(), None, Default::default()),
        };

        // Inline registers continue the template's index sequence
        for reg in &config.registers {
            let index = definitions.len() as u32;
            let data_type = reg.data_type.unwrap_or(if reg.kind.is_bit() {
                DataType::Bool
            } else {
                DataType::U16
            });
            definitions.push(
                RegisterDefinition::new(index, reg.kind, reg.address, data_type)
                    .with_param_id(reg.param_id.unwrap_or(index))
                    .with_byte_order(reg.byte_order)
                    .with_scaling(reg.scale, reg.offset)
                    .with_label(reg.label.clone()),
            );
        }

        let unit_id = config.unit_id.or(template_unit).unwrap_or(1);
        if !(1..=247).contains(&unit_id) {
            return Err(SatProxyError::inconsistent(format!(
                "outstation '{}': unit id {} out of range 1..=247",
                config.id, unit_id
            )));
        }

        if definitions.is_empty() {
            warn!("Outstation {} has no registers configured", config.id);
        }

        let map = RegisterMap::new(config.id.clone(), unit_id, definitions)?
            .with_identity(config.identity.clone().unwrap_or(identity));

        Ok(Self::new(map, listen, config.writable))
    }
}

/// One immutable generation of the outstation mapping
#[derive(Debug, Default)]
pub struct ResolverState {
    outstations: HashMap<String, Arc<OutstationContext>>,
    units: HashMap<(SocketAddr, u8), String>,
    generation: u64,
}

impl ResolverState {
    /// Index the contexts; duplicate ids or unit collisions are fatal
    pub fn build(contexts: Vec<OutstationContext>) -> Result<Self> {
        let mut outstations = HashMap::new();
        let mut units = HashMap::new();

        for context in contexts {
            let id = context.id().to_string();
            let unit_key = (context.listen, context.unit_id());
            if let Some(other) = units.get(&unit_key) {
                return Err(SatProxyError::inconsistent(format!(
                    "outstations '{}' and '{}' both use unit id {} on {}",
                    other, id, unit_key.1, unit_key.0
                )));
            }
            if outstations.contains_key(&id) {
                return Err(SatProxyError::inconsistent(format!(
                    "duplicate outstation id '{id}'"
                )));
            }
            units.insert(unit_key, id.clone());
            outstations.insert(id, Arc::new(context));
        }

        Ok(Self {
            outstations,
            units,
            generation: 0,
        })
    }

    /// Build from the service configuration
    pub fn from_config(config: &SatProxyConfig) -> Result<Self> {
        let contexts = config
            .outstations
            .iter()
            .map(|o| OutstationContext::from_config(o, config))
            .collect::<Result<Vec<_>>>()?;
        Self::build(contexts)
    }

    pub fn resolve(&self, outstation_id: &str) -> Result<Arc<OutstationContext>> {
        self.outstations
            .get(outstation_id)
            .cloned()
            .ok_or_else(|| SatProxyError::unknown_outstation(outstation_id))
    }

    pub fn by_unit(&self, listen: SocketAddr, unit_id: u8) -> Option<Arc<OutstationContext>> {
        let id = self.units.get(&(listen, unit_id))?;
        self.outstations.get(id).cloned()
    }

    pub fn contains(&self, outstation_id: &str) -> bool {
        self.outstations.contains_key(outstation_id)
    }

    /// Outstation ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.outstations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Distinct Modbus listen addresses
    pub fn listen_addresses(&self) -> BTreeSet<SocketAddr> {
        self.outstations.values().map(|o| o.listen).collect()
    }

    pub fn len(&self) -> usize {
        self.outstations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstations.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Shared, hot-reloadable resolver
pub struct ContextResolver {
    state: ArcSwap<ResolverState>,
}

impl ContextResolver {
    pub fn new(state: ResolverState) -> Self {
        Self {
            state: ArcSwap::from_pointee(state),
        }
    }

    /// Current state; hold it for the duration of one message or request
    pub fn load(&self) -> Arc<ResolverState> {
        self.state.load_full()
    }

    pub fn resolve(&self, outstation_id: &str) -> Result<Arc<OutstationContext>> {
        self.state.load().resolve(outstation_id)
    }

    pub fn by_unit(&self, listen: SocketAddr, unit_id: u8) -> Option<Arc<OutstationContext>> {
        self.state.load().by_unit(listen, unit_id)
    }

    pub fn contains(&self, outstation_id: &str) -> bool {
        self.state.load().contains(outstation_id)
    }

    pub fn generation(&self) -> u64 {
        self.state.load().generation
    }

    /// Swap in a new mapping and return the one it replaced
    pub fn reload(&self, mut next: ResolverState) -> Arc<ResolverState> {
        let previous = self.state.load_full();
        next.generation = previous.generation + 1;
        info!(
            "Resolver reloaded: generation {} with {} outstations",
            next.generation,
            next.len()
        );
        self.state.swap(Arc::new(next))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use satproxy_model::RegisterKind;

    fn context(id: &str, listen: &str, unit: u8, addresses: &[u16]) -> OutstationContext {
        let defs = addresses
            .iter()
            .enumerate()
            .map(|(i, a)| {
                RegisterDefinition::new(i as u32, RegisterKind::HoldingRegister, *a, DataType::U16)
            })
            .collect();
        OutstationContext::new(
            RegisterMap::new(id, unit, defs).unwrap(),
            listen.parse().unwrap(),
            false,
        )
    }

    #[test]
    fn test_resolve_and_by_unit() {
        let state = ResolverState::build(vec![
            context("A1", "127.0.0.1:5020", 1, &[100, 101]),
            context("B2", "127.0.0.1:5020", 2, &[0]),
            context("C3", "127.0.0.1:5021", 1, &[0]),
        ])
        .unwrap();
        let resolver = ContextResolver::new(state);

        assert_eq!(resolver.resolve("A1").unwrap().map.len(), 2);
        assert!(matches!(
            resolver.resolve("Z9"),
            Err(SatProxyError::UnknownOutstation(_))
        ));

        let listen: SocketAddr = "127.0.0.1:5020".parse().unwrap();
        assert_eq!(resolver.by_unit(listen, 2).unwrap().id(), "B2");
        assert!(resolver.by_unit(listen, 9).is_none());
        assert_eq!(resolver.load().listen_addresses().len(), 2);
        assert_eq!(resolver.load().ids(), vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn test_unit_collision_rejected() {
        let err = ResolverState::build(vec![
            context("A1", "127.0.0.1:5020", 1, &[0]),
            context("B2", "127.0.0.1:5020", 1, &[0]),
        ])
        .unwrap_err();
        assert!(matches!(err, SatProxyError::ConfigurationInconsistent(_)));
    }

    #[test]
    fn test_reload_is_atomic_for_holders() {
        let resolver = ContextResolver::new(
            ResolverState::build(vec![context("A1", "127.0.0.1:5020", 1, &[100])]).unwrap(),
        );
        let held = resolver.load();

        let previous = resolver.reload(
            ResolverState::build(vec![context("A1", "127.0.0.1:5020", 1, &[200, 201])]).unwrap(),
        );

        // A caller that loaded before the swap keeps the old mapping intact
        assert_eq!(held.resolve("A1").unwrap().map.len(), 1);
        assert_eq!(previous.generation(), 0);
        assert_eq!(resolver.generation(), 1);
        assert_eq!(resolver.resolve("A1").unwrap().map.len(), 2);
    }

    #[test]
    fn test_from_config_with_template_and_inline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("templates")).unwrap();
        std::fs::write(
            dir.path().join("templates/a1.dat"),
            "/*DEVICE;VendorName=Acme\ndeviceId=a1;networkId=5\nparamId=1;address=100;registerType=holding\n",
        )
        .unwrap();

        let yaml = r#"
outstations:
  - id: A1
    listen: 127.0.0.1:5020
    template: templates/a1.dat
    registers:
      - { type: holding, address: 101 }
"#;
        let config = SatProxyConfig::from_yaml_str(yaml, dir.path()).unwrap();
        let state = ResolverState::from_config(&config).unwrap();
        let a1 = state.resolve("A1").unwrap();
        assert_eq!(a1.unit_id(), 5);
        assert_eq!(a1.map.identity().vendor_name, "Acme");
        assert_eq!(a1.map.by_index(1).unwrap().address, 101);
    }

    #[test]
    fn test_from_config_overlap_is_inconsistent() {
        let yaml = r#"
outstations:
  - id: A1
    listen: 127.0.0.1:5020
    registers:
      - { type: holding, address: 100, data_type: u32 }
      - { type: holding, address: 101 }
"#;
        let config = SatProxyConfig::from_yaml_str(yaml, ".").unwrap();
        let err = ResolverState::from_config(&config).unwrap_err();
        assert!(matches!(err, SatProxyError::ConfigurationInconsistent(_)));
    }

    #[test]
    fn test_bad_listen_address() {
        let yaml = r#"
outstations:
  - { id: A1, listen: "not-an-address" }
"#;
        let config = SatProxyConfig::from_yaml_str(yaml, ".").unwrap();
        assert!(ResolverState::from_config(&config).is_err());
    }
}
