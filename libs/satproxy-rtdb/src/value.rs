//! Register values and per-outstation snapshots

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Freshness of a register value as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Validity {
    /// Reported by the outstation and within the staleness threshold
    Valid,
    /// Last contact is older than the staleness threshold
    Stale,
    /// No payload has ever carried this register
    NeverReceived,
    /// Absent from the latest full snapshot; not served until reported again
    Pending,
}

impl Validity {
    /// Whether the value may be served to a Modbus master
    pub fn is_servable(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Stale => "stale",
            Self::NeverReceived => "never_received",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current value of one configured register
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterValue {
    /// Register words exactly as the outstation reported them
    pub raw: Vec<u16>,
    /// Decoded and scaled engineering value
    pub value: f64,
    /// Outstation-side timestamp of the reading (ms since epoch)
    pub timestamp_ms: i64,
    /// Store generation that last wrote this value
    pub sequence: u64,
    pub validity: Validity,
}

/// Why a field could not be mapped to a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownReason {
    /// Index not present in the current register map
    UnmappedIndex,
    /// Field width does not match the configured data type
    WidthMismatch,
    /// Raw words could not be decoded with the configured type
    Undecodable,
}

/// Diagnostic record for fields that never reach the register table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownField {
    pub index: u32,
    pub reason: UnknownReason,
    pub raw: Vec<u16>,
    pub timestamp_ms: i64,
    /// How many times this index was seen unmapped
    pub count: u64,
    pub last_seen_ms: i64,
}

/// Immutable view of one outstation, published atomically
///
/// Readers hold an `Arc` of this; writers build a modified copy and swap it in.
#[derive(Debug, Clone, Default)]
pub struct OutstationSnapshot {
    pub outstation_id: String,
    pub(crate) values: HashMap<u32, RegisterValue>,
    pub(crate) unknown: BTreeMap<u32, UnknownField>,
    /// Receipt time of the last message with an accepted field
    pub last_contact_ms: Option<i64>,
    /// Newest outstation-side transmission time seen
    pub last_report_ms: Option<i64>,
    /// Number of committed transactions
    pub generation: u64,
    pub accepted_total: u64,
    pub duplicate_total: u64,
}

impl OutstationSnapshot {
    pub(crate) fn new(outstation_id: &str) -> Self {
        Self {
            outstation_id: outstation_id.to_string(),
            ..Default::default()
        }
    }

    /// Stored value without staleness applied
    pub fn value(&self, index: u32) -> Option<&RegisterValue> {
        self.values.get(&index)
    }

    /// Stored values ordered by index
    pub fn values(&self) -> Vec<(u32, &RegisterValue)> {
        let mut out: Vec<_> = self.values.iter().map(|(i, v)| (*i, v)).collect();
        out.sort_by_key(|(i, _)| *i);
        out
    }

    pub fn unknown_fields(&self) -> impl Iterator<Item = &UnknownField> {
        self.unknown.values()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn pending_count(&self) -> usize {
        self.values
            .values()
            .filter(|v| v.validity == Validity::Pending)
            .count()
    }
}
