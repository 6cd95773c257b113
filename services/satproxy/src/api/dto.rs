//! Data transfer objects of the HTTP bridge

use serde::{Deserialize, Serialize};

use crate::core::ingest::IngestStatsSnapshot;
use crate::protocols::modbus::ModbusStatsSnapshot;
use common::ServiceStatus;
use satproxy_model::{DeviceIdentity, RegisterDefinition};
use satproxy_rtdb::{OutstationSummary, RegisterValue, UnknownField, Validity};

/// `/health` payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: ServiceStatus,
    pub service: String,
    pub version: String,
    pub uptime_secs: i64,
    pub outstations: usize,
    /// Outstations whose last contact is older than the staleness threshold
    pub stale_outstations: usize,
    pub generation: u64,
    pub timestamp: String,
}

/// One configured outstation as the cloud side sees it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstationInfo {
    pub id: String,
    pub unit_id: u8,
    pub listen: String,
    pub writable: bool,
    pub registers: usize,
    pub pending_writes: usize,
    /// Last contact as RFC 3339, absent before the first accepted field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<String>,
    /// Store-side counters; absent until the outstation reports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<OutstationSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstationDetail {
    #[serde(flatten)]
    pub info: OutstationInfo,
    pub identity: DeviceIdentity,
    pub unknown_fields: Vec<UnknownField>,
}

/// A mapped register with its current value
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterView {
    pub definition: RegisterDefinition,
    pub validity: Validity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RegisterValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub ingest: IngestStatsSnapshot,
    pub modbus: ModbusStatsSnapshot,
    pub pending_writes: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogLevelRequest {
    /// Plain level (`debug`) or a full filter (`info,satproxy=trace`)
    pub level: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLevelResponse {
    pub level: String,
}
