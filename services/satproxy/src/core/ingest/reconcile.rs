//! Reconciliation engine
//!
//! Applies a decoded [`PayloadMessage`] to the register store. One message
//! is one store transaction, so readers see either none or all of it.
//!
//! Ordering rules per register:
//! - delta field with `timestamp <= stored` is superseded and only counted
//! - snapshot fields always overwrite
//! - a snapshot marks every mapped register it does not validly carry as pending

use super::wire::{FieldWidth, PayloadMessage};
use crate::core::config::{ContextResolver, OutstationContext};
use crate::error::{Result, SatProxyError};
use satproxy_rtdb::{RegisterStore, StoreTransaction, UnknownReason};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of applying one message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub outstation_id: String,
    pub sequence: u16,
    pub snapshot: bool,
    /// Fields written to the store
    pub accepted: usize,
    /// Fields superseded by a newer or equal stored timestamp
    pub duplicates: usize,
    /// Fields with an unmapped index, wrong width or undecodable value
    pub unknown_fields: usize,
    /// Registers marked pending by a snapshot
    pub pending_marked: usize,
    /// Store generation after the message
    pub generation: u64,
}

pub struct Reconciler {
    resolver: Arc<ContextResolver>,
    store: Arc<RegisterStore>,
}

impl Reconciler {
    pub fn new(resolver: Arc<ContextResolver>, store: Arc<RegisterStore>) -> Self {
        Self { resolver, store }
    }

    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    /// Apply one message
    ///
    /// The register map is resolved once and checked again under the
    /// outstation's writer lock. A reload in between means the message is
    /// re-applied against the new map, so no message straddles two schemas
    /// and nothing lands after the reload pruned the store.
    pub fn apply(&self, message: &PayloadMessage) -> Result<ReconcileResult> {
        let id = &message.outstation_id;
        loop {
            let context = self.resolver.resolve(id)?;
            let applied = self.store.update(id, |tx| -> Result<Option<ReconcileResult>> {
                let current = self.resolver.resolve(id)?;
                if !Arc::ptr_eq(&current, &context) {
                    return Ok(None);
                }
                Ok(Some(apply_fields(&context, message, tx)))
            })?;

            match applied {
                Some(mut result) => {
                    result.generation = self
                        .store
                        .snapshot(id)
                        .map(|s| s.generation)
                        .unwrap_or_default();
                    return Ok(result);
                },
                None => debug!("{}: mapping reloaded mid-message, re-applying", id),
            }
        }
    }
}

fn apply_fields(
    context: &OutstationContext,
    message: &PayloadMessage,
    tx: &mut StoreTransaction,
) -> ReconcileResult {
    let map = &context.map;
    let mut result = ReconcileResult {
        outstation_id: message.outstation_id.clone(),
        sequence: message.sequence,
        snapshot: message.snapshot,
        ..Default::default()
    };
    // Registers validly reported by this message
    let mut reported = HashSet::new();

    for field in &message.fields {
        let Some(def) = map.by_index(field.index) else {
            trace!(
                "{}: field index {} is not mapped",
                message.outstation_id,
                field.index
            );
            tx.record_unknown(
                field.index,
                UnknownReason::UnmappedIndex,
                field.raw.clone(),
                field.timestamp_ms,
            );
            result.unknown_fields += 1;
            continue;
        };

        if FieldWidth::for_data_type(def.data_type) != field.width {
            debug!(
                "{}: index {} sent as {:?}, configured {}",
                message.outstation_id, field.index, field.width, def.data_type
            );
            tx.record_unknown(
                field.index,
                UnknownReason::WidthMismatch,
                field.raw.clone(),
                field.timestamp_ms,
            );
            result.unknown_fields += 1;
            continue;
        }

        if !message.snapshot {
            if let Some(stored) = tx.current(field.index) {
                if field.timestamp_ms <= stored.timestamp_ms {
                    let rejected = SatProxyError::StaleOrDuplicateUpdate {
                        outstation: message.outstation_id.clone(),
                        index: field.index,
                    };
                    trace!("{}", rejected);
                    tx.record_duplicate();
                    result.duplicates += 1;
                    continue;
                }
            }
        }

        let value = match def.to_engineering(&field.raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(
                    "{}: index {} undecodable: {}",
                    message.outstation_id, field.index, e
                );
                tx.record_unknown(
                    field.index,
                    UnknownReason::Undecodable,
                    field.raw.clone(),
                    field.timestamp_ms,
                );
                result.unknown_fields += 1;
                continue;
            },
        };

        tx.put(field.index, field.raw.clone(), value, field.timestamp_ms);
        reported.insert(field.index);
        result.accepted += 1;
    }

    // A snapshot vouches only for what it validly carried
    if message.snapshot {
        for def in map.definitions() {
            if !reported.contains(&def.index) && tx.mark_pending(def.index) {
                result.pending_marked += 1;
            }
        }
    }

    if result.accepted > 0 {
        tx.touch_contact(message.timestamp_ms);
    }
    result
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::config::ResolverState;
    use crate::core::ingest::wire::FieldUpdate;
    use satproxy_model::{ByteOrder, DataType, RegisterDefinition, RegisterKind, RegisterMap};
    use satproxy_rtdb::{FixedTimeProvider, Validity};
    use std::time::Duration;

    fn setup() -> (Reconciler, Arc<RegisterStore>) {
        let defs = vec![
            RegisterDefinition::new(0, RegisterKind::HoldingRegister, 100, DataType::U16),
            RegisterDefinition::new(1, RegisterKind::HoldingRegister, 101, DataType::U16),
            RegisterDefinition::new(2, RegisterKind::InputRegister, 0, DataType::F32)
                .with_byte_order(ByteOrder::BigEndian)
                .with_scaling(2.0, 0.0),
            RegisterDefinition::new(3, RegisterKind::Coil, 0, DataType::Bool),
        ];
        let map = RegisterMap::new("A1", 1, defs).unwrap();
        let state = ResolverState::build(vec![OutstationContext::new(
            map,
            "127.0.0.1:5020".parse().unwrap(),
            false,
        )])
        .unwrap();
        let resolver = Arc::new(ContextResolver::new(state));
        let store = Arc::new(RegisterStore::new(
            Some(Duration::from_secs(900)),
            Arc::new(FixedTimeProvider::new(200_000)),
        ));
        (Reconciler::new(resolver, store.clone()), store)
    }

    fn message(snapshot: bool, ts: i64, fields: Vec<FieldUpdate>) -> PayloadMessage {
        PayloadMessage {
            outstation_id: "A1".into(),
            version: 1,
            sequence: 1,
            timestamp_ms: ts,
            snapshot,
            fields,
        }
    }

    #[test]
    fn test_newer_accepted_older_rejected() {
        let (reconciler, store) = setup();

        let r = reconciler
            .apply(&message(false, 100, vec![FieldUpdate::word(0, 42, 100)]))
            .unwrap();
        assert_eq!(r.accepted, 1);
        assert_eq!(store.get("A1", 0).unwrap().raw, vec![42]);

        // Equal timestamp is a duplicate
        let r = reconciler
            .apply(&message(false, 100, vec![FieldUpdate::word(0, 43, 100)]))
            .unwrap();
        assert_eq!((r.accepted, r.duplicates), (0, 1));

        // Older timestamp rejected, newer accepted, in one message
        let r = reconciler
            .apply(&message(
                false,
                150,
                vec![FieldUpdate::word(0, 99, 50), FieldUpdate::word(1, 7, 150)],
            ))
            .unwrap();
        assert_eq!((r.accepted, r.duplicates), (1, 1));
        assert_eq!(store.get("A1", 0).unwrap().raw, vec![42]);
        assert_eq!(store.get("A1", 1).unwrap().raw, vec![7]);

        let snapshot = store.snapshot("A1").unwrap();
        assert_eq!(snapshot.duplicate_total, 2);
        assert_eq!(snapshot.last_report_ms, Some(150));
    }

    #[test]
    fn test_snapshot_marks_missing_pending_and_overwrites() {
        let (reconciler, store) = setup();
        reconciler
            .apply(&message(
                false,
                500,
                vec![FieldUpdate::word(0, 1, 500), FieldUpdate::word(1, 2, 500)],
            ))
            .unwrap();

        // Snapshot older than stored data still overwrites index 0
        let r = reconciler
            .apply(&message(true, 400, vec![FieldUpdate::word(0, 9, 400)]))
            .unwrap();
        assert_eq!(r.accepted, 1);
        assert_eq!(r.pending_marked, 1);

        let zero = store.get("A1", 0).unwrap();
        assert_eq!(zero.raw, vec![9]);
        assert_eq!(zero.validity, Validity::Valid);
        assert_eq!(store.get("A1", 1).unwrap().validity, Validity::Pending);

        // A newer delta clears the pending mark
        reconciler
            .apply(&message(false, 600, vec![FieldUpdate::word(1, 3, 600)]))
            .unwrap();
        assert_eq!(store.get("A1", 1).unwrap().validity, Validity::Valid);
    }

    #[test]
    fn test_snapshot_with_invalid_field_marks_register_pending() {
        let (reconciler, store) = setup();
        reconciler
            .apply(&message(
                false,
                100,
                vec![
                    FieldUpdate::word(0, 1, 100),
                    FieldUpdate::words(2, vec![0x4148, 0x0000], 100).unwrap(),
                ],
            ))
            .unwrap();

        // Index 2 is an f32 but arrives as a single word
        let r = reconciler
            .apply(&message(
                true,
                200,
                vec![FieldUpdate::word(0, 5, 200), FieldUpdate::word(2, 9, 200)],
            ))
            .unwrap();
        assert_eq!(r.accepted, 1);
        assert_eq!(r.unknown_fields, 1);
        assert_eq!(r.pending_marked, 1);

        let two = store.get("A1", 2).unwrap();
        assert_eq!(two.validity, Validity::Pending);
        assert_eq!(two.raw, vec![0x4148, 0x0000]);
        assert_eq!(store.get("A1", 0).unwrap().validity, Validity::Valid);
    }

    #[test]
    fn test_apply_uses_reloaded_map() {
        let (reconciler, store) = setup();
        let defs = vec![RegisterDefinition::new(
            0,
            RegisterKind::HoldingRegister,
            100,
            DataType::U16,
        )];
        reconciler
            .resolver
            .reload(
                ResolverState::build(vec![OutstationContext::new(
                    RegisterMap::new("A1", 1, defs).unwrap(),
                    "127.0.0.1:5020".parse().unwrap(),
                    false,
                )])
                .unwrap(),
            );

        let r = reconciler
            .apply(&message(
                false,
                100,
                vec![FieldUpdate::word(0, 1, 100), FieldUpdate::word(1, 2, 100)],
            ))
            .unwrap();
        assert_eq!((r.accepted, r.unknown_fields), (1, 1));
        assert!(store.snapshot("A1").unwrap().value(1).is_none());
    }

    #[test]
    fn test_unknown_and_mismatched_fields_recorded() {
        let (reconciler, store) = setup();
        let r = reconciler
            .apply(&message(
                false,
                100,
                vec![
                    FieldUpdate::word(77, 1, 100),
                    FieldUpdate::word(2, 1, 100), // f32 needs two words
                    FieldUpdate::bit(3, true, 100),
                ],
            ))
            .unwrap();
        assert_eq!(r.unknown_fields, 2);
        assert_eq!(r.accepted, 1);

        let snapshot = store.snapshot("A1").unwrap();
        let unknown: Vec<_> = snapshot.unknown_fields().map(|f| (f.index, f.reason)).collect();
        assert_eq!(
            unknown,
            vec![
                (2, UnknownReason::WidthMismatch),
                (77, UnknownReason::UnmappedIndex)
            ]
        );
        // Unmapped indices never become register values
        assert!(snapshot.value(77).is_none());
        assert_eq!(store.get("A1", 3).unwrap().value, 1.0);
    }

    #[test]
    fn test_scaled_float_value() {
        let (reconciler, store) = setup();
        // 12.5f32 = 0x4148_0000
        reconciler
            .apply(&message(
                false,
                100,
                vec![FieldUpdate::words(2, vec![0x4148, 0x0000], 100).unwrap()],
            ))
            .unwrap();
        let value = store.get("A1", 2).unwrap();
        assert_eq!(value.raw, vec![0x4148, 0x0000]);
        assert_eq!(value.value, 25.0);
    }

    #[test]
    fn test_contact_only_advances_on_acceptance() {
        let (reconciler, store) = setup();
        reconciler
            .apply(&message(false, 100, vec![FieldUpdate::word(77, 1, 100)]))
            .unwrap();
        let snapshot = store.snapshot("A1").unwrap();
        assert_eq!(snapshot.last_contact_ms, None);
        assert!(store.view("A1").unwrap().is_stale());
    }

    #[test]
    fn test_unknown_outstation_surfaced() {
        let (reconciler, _) = setup();
        let mut msg = message(false, 100, vec![FieldUpdate::word(0, 1, 100)]);
        msg.outstation_id = "Z9".into();
        assert!(matches!(
            reconciler.apply(&msg),
            Err(SatProxyError::UnknownOutstation(_))
        ));
    }
}
