//! Per-outstation register map

use crate::error::{ModelError, Result};
use crate::register::{DeviceIdentity, RegisterDefinition, RegisterKey, RegisterKind};
use std::collections::HashMap;

/// Where an address lands inside a configured definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AddressSlot {
    /// Compact index of the definition
    index: u32,
    /// Word offset inside a multi-register value (0 for the first word)
    word_offset: u16,
}

/// Immutable register layout of one outstation
///
/// Exposes the ordered configured list (index to definition) and a reverse
/// lookup that covers every word address of multi-register values.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    outstation_id: String,
    unit_id: u8,
    identity: DeviceIdentity,
    definitions: Vec<RegisterDefinition>,
    reverse: HashMap<RegisterKey, AddressSlot>,
}

impl RegisterMap {
    /// Build and validate a map.
    ///
    /// Fails with [`ModelError::Inconsistent`] when the definitions contradict
    /// each other; a map that passes is safe to serve.
    pub fn new(
        outstation_id: impl Into<String>,
        unit_id: u8,
        definitions: Vec<RegisterDefinition>,
    ) -> Result<Self> {
        let outstation_id = outstation_id.into();
        let inconsistent = |reason: String| ModelError::Inconsistent {
            outstation: outstation_id.clone(),
            reason,
        };

        if outstation_id.trim().is_empty() {
            return Err(inconsistent("outstation id is empty".to_string()));
        }

        let mut reverse: HashMap<RegisterKey, AddressSlot> = HashMap::new();
        for (position, def) in definitions.iter().enumerate() {
            if def.index as usize != position {
                return Err(inconsistent(format!(
                    "definition at position {} carries index {}",
                    position, def.index
                )));
            }
            def.validate().map_err(&inconsistent)?;

            for word_offset in 0..def.word_count() as u16 {
                let key = RegisterKey::new(def.kind, def.address + word_offset);
                if let Some(existing) = reverse.get(&key) {
                    return Err(inconsistent(format!(
                        "{} is claimed by index {} and index {}",
                        key, existing.index, def.index
                    )));
                }
                reverse.insert(
                    key,
                    AddressSlot {
                        index: def.index,
                        word_offset,
                    },
                );
            }
        }

        Ok(Self {
            outstation_id,
            unit_id,
            identity: DeviceIdentity::default(),
            definitions,
            reverse,
        })
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn outstation_id(&self) -> &str {
        &self.outstation_id
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Ordered configured registers
    pub fn definitions(&self) -> &[RegisterDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definition by compact wire index
    pub fn by_index(&self, index: u32) -> Option<&RegisterDefinition> {
        self.definitions.get(index as usize)
    }

    /// Reverse lookup: which definition covers this address
    pub fn lookup(&self, kind: RegisterKind, address: u16) -> Option<(&RegisterDefinition, u16)> {
        let slot = self.reverse.get(&RegisterKey::new(kind, address))?;
        self.by_index(slot.index).map(|def| (def, slot.word_offset))
    }
}
