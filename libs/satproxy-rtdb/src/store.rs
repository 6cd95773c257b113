//! Per-outstation register store
//!
//! ## Concurrency
//!
//! Each outstation owns an independent cell holding an `ArcSwap` of its
//! current [`OutstationSnapshot`] and a writer mutex:
//! - Writers to the same outstation serialize on the mutex, copy the current
//!   snapshot, mutate the copy and publish it with a single pointer swap.
//! - Writers to different outstations never touch the same lock.
//! - Readers load the current `Arc` and never block, so a reader sees either
//!   none or all of a committed transaction.

use crate::error::{Result, RtdbError};
use crate::time::TimeProvider;
use crate::value::{
    OutstationSnapshot, RegisterValue, UnknownField, UnknownReason, Validity,
};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct OutstationCell {
    current: ArcSwap<OutstationSnapshot>,
    writer: Mutex<()>,
}

impl OutstationCell {
    fn new(outstation_id: &str) -> Self {
        Self {
            current: ArcSwap::from_pointee(OutstationSnapshot::new(outstation_id)),
            writer: Mutex::new(()),
        }
    }
}

/// Summary row for listings and the heartbeat log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstationSummary {
    pub outstation_id: String,
    pub last_contact_ms: Option<i64>,
    pub last_report_ms: Option<i64>,
    pub staleness_ms: Option<u64>,
    pub stale: bool,
    pub value_count: usize,
    pub pending_count: usize,
    pub unknown_count: usize,
    pub generation: u64,
    pub accepted_total: u64,
    pub duplicate_total: u64,
}

/// Consistent read view of one outstation at one instant
///
/// A Modbus request takes a single view so every register it returns comes
/// from the same committed generation.
#[derive(Debug, Clone)]
pub struct StoreView {
    snapshot: Arc<OutstationSnapshot>,
    stale: bool,
}

impl StoreView {
    /// Value with staleness applied, or `None` when never received
    pub fn get(&self, index: u32) -> Option<RegisterValue> {
        let mut value = self.snapshot.value(index)?.clone();
        if self.stale && value.validity == Validity::Valid {
            value.validity = Validity::Stale;
        }
        Some(value)
    }

    /// Effective validity of an index, including never-received
    pub fn validity(&self, index: u32) -> Validity {
        self.get(index)
            .map(|v| v.validity)
            .unwrap_or(Validity::NeverReceived)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn snapshot(&self) -> &OutstationSnapshot {
        &self.snapshot
    }
}

/// Mutable working copy handed to a writer inside [`RegisterStore::update`]
pub struct StoreTransaction {
    next: OutstationSnapshot,
    now_ms: i64,
    dirty: bool,
}

impl StoreTransaction {
    pub fn outstation_id(&self) -> &str {
        &self.next.outstation_id
    }

    /// Receipt time of this transaction
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Current stored value, as of the start of this transaction plus own writes
    pub fn current(&self, index: u32) -> Option<&RegisterValue> {
        self.next.values.get(&index)
    }

    /// Write a value as valid
    pub fn put(&mut self, index: u32, raw: Vec<u16>, value: f64, timestamp_ms: i64) {
        let sequence = self.next.generation + 1;
        self.next.values.insert(
            index,
            RegisterValue {
                raw,
                value,
                timestamp_ms,
                sequence,
                validity: Validity::Valid,
            },
        );
        self.next.accepted_total += 1;
        self.dirty = true;
    }

    /// Mark a stored value as pending; returns false when nothing was stored
    pub fn mark_pending(&mut self, index: u32) -> bool {
        match self.next.values.get_mut(&index) {
            Some(value) => {
                if value.validity != Validity::Pending {
                    value.validity = Validity::Pending;
                    self.dirty = true;
                }
                true
            },
            None => false,
        }
    }

    /// Count a superseded update
    pub fn record_duplicate(&mut self) {
        self.next.duplicate_total += 1;
        self.dirty = true;
    }

    /// Keep a diagnostic record of a field that did not map to a register
    pub fn record_unknown(
        &mut self,
        index: u32,
        reason: UnknownReason,
        raw: Vec<u16>,
        timestamp_ms: i64,
    ) {
        let now_ms = self.now_ms;
        self.next
            .unknown
            .entry(index)
            .and_modify(|field| {
                field.reason = reason;
                field.raw = raw.clone();
                field.timestamp_ms = timestamp_ms;
                field.count += 1;
                field.last_seen_ms = now_ms;
            })
            .or_insert_with(|| UnknownField {
                index,
                reason,
                raw,
                timestamp_ms,
                count: 1,
                last_seen_ms: now_ms,
            });
        self.dirty = true;
    }

    /// Advance last contact to the receipt time and last report to `report_ms`
    pub fn touch_contact(&mut self, report_ms: i64) {
        self.next.last_contact_ms = Some(self.now_ms);
        self.next.last_report_ms = Some(
            self.next
                .last_report_ms
                .map_or(report_ms, |prev| prev.max(report_ms)),
        );
        self.dirty = true;
    }
}

/// Process-wide register table indexed by outstation id
pub struct RegisterStore {
    outstations: DashMap<String, Arc<OutstationCell>>,
    stale_after: Option<Duration>,
    clock: Arc<dyn TimeProvider>,
}

impl RegisterStore {
    /// Create a store; `stale_after = None` disables staleness
    pub fn new(stale_after: Option<Duration>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            outstations: DashMap::new(),
            stale_after,
            clock,
        }
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    fn cell(&self, outstation_id: &str) -> Option<Arc<OutstationCell>> {
        self.outstations
            .get(outstation_id)
            .map(|entry| entry.value().clone())
    }

    fn cell_or_create(&self, outstation_id: &str) -> Arc<OutstationCell> {
        if let Some(cell) = self.cell(outstation_id) {
            return cell;
        }
        self.outstations
            .entry(outstation_id.to_string())
            .or_insert_with(|| {
                debug!("Register store: new outstation {}", outstation_id);
                Arc::new(OutstationCell::new(outstation_id))
            })
            .value()
            .clone()
    }

    fn is_stale(&self, snapshot: &OutstationSnapshot, now_ms: i64) -> bool {
        let Some(threshold) = self.stale_after else {
            return false;
        };
        match snapshot.last_contact_ms {
            Some(contact) => ((now_ms - contact).max(0) as u128) > threshold.as_millis(),
            None => true,
        }
    }

    /// Run `f` against a private copy of the outstation and publish the result.
    ///
    /// Creates the outstation on first use. Nothing is published when `f`
    /// made no change.
    pub fn update<R>(&self, outstation_id: &str, f: impl FnOnce(&mut StoreTransaction) -> R) -> R {
        let cell = self.cell_or_create(outstation_id);
        let _writer = cell.writer.lock();

        let current = cell.current.load_full();
        let mut tx = StoreTransaction {
            next: (*current).clone(),
            now_ms: self.clock.now_millis(),
            dirty: false,
        };

        let result = f(&mut tx);

        if tx.dirty {
            tx.next.generation += 1;
            cell.current.store(Arc::new(tx.next));
        }
        result
    }

    /// Latest published snapshot (no staleness applied)
    pub fn snapshot(&self, outstation_id: &str) -> Option<Arc<OutstationSnapshot>> {
        self.cell(outstation_id)
            .map(|cell| cell.current.load_full())
    }

    /// Consistent view with staleness evaluated now
    pub fn view(&self, outstation_id: &str) -> Option<StoreView> {
        let snapshot = self.snapshot(outstation_id)?;
        let stale = self.is_stale(&snapshot, self.clock.now_millis());
        Some(StoreView { snapshot, stale })
    }

    /// Single value lookup with staleness applied
    pub fn get(&self, outstation_id: &str, index: u32) -> Result<RegisterValue> {
        let view = self
            .view(outstation_id)
            .ok_or_else(|| RtdbError::OutstationNotFound(outstation_id.to_string()))?;
        view.get(index).ok_or_else(|| RtdbError::ValueNotFound {
            outstation: outstation_id.to_string(),
            index,
        })
    }

    /// Time since the last accepted update
    pub fn staleness(&self, outstation_id: &str) -> Result<Duration> {
        let snapshot = self
            .snapshot(outstation_id)
            .ok_or_else(|| RtdbError::OutstationNotFound(outstation_id.to_string()))?;
        let contact = snapshot
            .last_contact_ms
            .ok_or_else(|| RtdbError::NoContact(outstation_id.to_string()))?;
        let elapsed = (self.clock.now_millis() - contact).max(0) as u64;
        Ok(Duration::from_millis(elapsed))
    }

    /// All known outstations, sorted by id
    pub fn list_outstations(&self) -> Vec<OutstationSummary> {
        let now_ms = self.clock.now_millis();
        let mut summaries: Vec<OutstationSummary> = self
            .outstations
            .iter()
            .map(|entry| {
                let snapshot = entry.value().current.load_full();
                OutstationSummary {
                    outstation_id: snapshot.outstation_id.clone(),
                    last_contact_ms: snapshot.last_contact_ms,
                    last_report_ms: snapshot.last_report_ms,
                    staleness_ms: snapshot
                        .last_contact_ms
                        .map(|contact| (now_ms - contact).max(0) as u64),
                    stale: self.is_stale(&snapshot, now_ms),
                    value_count: snapshot.value_count(),
                    pending_count: snapshot.pending_count(),
                    unknown_count: snapshot.unknown.len(),
                    generation: snapshot.generation,
                    accepted_total: snapshot.accepted_total,
                    duplicate_total: snapshot.duplicate_total,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.outstation_id.cmp(&b.outstation_id));
        summaries
    }

    /// Drop values (and unknown-field records) whose index fails `keep`.
    ///
    /// Used after a configuration reload so no value outlives its definition.
    /// Returns the number of values removed.
    pub fn retain_mapped(&self, outstation_id: &str, keep: impl Fn(u32) -> bool) -> usize {
        if self.cell(outstation_id).is_none() {
            return 0;
        }
        self.update(outstation_id, |tx| {
            let before = tx.next.values.len();
            tx.next.values.retain(|index, _| keep(*index));
            let removed = before - tx.next.values.len();

            let unknown_before = tx.next.unknown.len();
            // Unknown indices that are now mapped are no longer unknown
            tx.next.unknown.retain(|index, _| !keep(*index));

            if removed > 0 || unknown_before != tx.next.unknown.len() {
                tx.dirty = true;
            }
            removed
        })
    }

    pub fn outstation_count(&self) -> usize {
        self.outstations.len()
    }
}
