//! Outstation API Handlers
//!
//! Register inspection, payload ingest and write draining for the cloud edge.

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use chrono::DateTime;
use std::sync::Arc;
use tracing::debug;

use crate::api::dto::{OutstationDetail, OutstationInfo, RegisterView};
use crate::app_state::AppState;
use crate::core::config::OutstationContext;
use crate::core::ingest::ReconcileResult;
use crate::error::SatProxyError;
use crate::protocols::modbus::WriteCommand;
use common::{AppError, SuccessResponse};
use satproxy_model::{RegisterDefinition, RegisterKind};
use satproxy_rtdb::{StoreView, Validity};

fn rfc3339(timestamp_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|t| t.to_rfc3339())
}

fn outstation_info(state: &AppState, context: &OutstationContext) -> OutstationInfo {
    let id = context.id();
    let store = state
        .store
        .list_outstations()
        .into_iter()
        .find(|s| s.outstation_id == id);

    OutstationInfo {
        id: id.to_string(),
        unit_id: context.unit_id(),
        listen: context.listen.to_string(),
        writable: context.writable,
        registers: context.map.len(),
        pending_writes: state.writes.pending(id),
        last_contact: store
            .as_ref()
            .and_then(|s| s.last_contact_ms)
            .and_then(rfc3339),
        store,
    }
}

fn register_view(definition: &RegisterDefinition, view: Option<&StoreView>) -> RegisterView {
    let value = view.and_then(|v| v.get(definition.index));
    RegisterView {
        definition: definition.clone(),
        validity: value
            .as_ref()
            .map(|v| v.validity)
            .unwrap_or(Validity::NeverReceived),
        value,
    }
}

/// List configured outstations
///
/// @route GET /api/outstations
/// @output Json<SuccessResponse<Vec<OutstationInfo>>> - Outstations sorted by id
pub async fn list_outstations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse<Vec<OutstationInfo>>>, AppError> {
    let resolver = state.resolver.load();
    let mut outstations = Vec::with_capacity(resolver.len());
    for id in resolver.ids() {
        let context = resolver.resolve(&id)?;
        outstations.push(outstation_info(&state, &context));
    }

    let total = outstations.len();
    Ok(Json(
        SuccessResponse::new(outstations).with_metadata("total", serde_json::json!(total)),
    ))
}

/// Get one outstation with identity and unknown-field diagnostics
///
/// @route GET /api/outstations/{id}
/// @input Path(id): String - Outstation id
/// @output Json<SuccessResponse<OutstationDetail>>
/// @status 404 - Outstation not configured
pub async fn get_outstation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<OutstationDetail>>, AppError> {
    let context = state.resolver.resolve(&id)?;
    let unknown_fields = state
        .store
        .snapshot(&id)
        .map(|s| s.unknown_fields().cloned().collect())
        .unwrap_or_default();

    Ok(Json(SuccessResponse::new(OutstationDetail {
        info: outstation_info(&state, &context),
        identity: context.map.identity().clone(),
        unknown_fields,
    })))
}

/// Every mapped register with its current value
///
/// @route GET /api/outstations/{id}/registers
/// @input Path(id): String - Outstation id
/// @output Json<SuccessResponse<Vec<RegisterView>>> - In compact index order
/// @status 404 - Outstation not configured
pub async fn list_registers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<Vec<RegisterView>>>, AppError> {
    let context = state.resolver.resolve(&id)?;
    let view = state.store.view(&id);
    let registers = context
        .map
        .definitions()
        .iter()
        .map(|def| register_view(def, view.as_ref()))
        .collect();
    Ok(Json(SuccessResponse::new(registers)))
}

/// One register by Modbus table and address
///
/// @route GET /api/outstations/{id}/registers/{kind}/{address}
/// @input Path((id, kind, address)): kind is `hr`, `ir`, `co`, `di` or a long name
/// @output Json<SuccessResponse<RegisterView>>
/// @status 400 - Unknown register kind
/// @status 404 - Outstation not configured or address not mapped
pub async fn get_register(
    State(state): State<Arc<AppState>>,
    Path((id, kind, address)): Path<(String, String, u16)>,
) -> Result<Json<SuccessResponse<RegisterView>>, AppError> {
    let kind: RegisterKind = kind
        .parse()
        .map_err(|e: satproxy_model::ModelError| AppError::bad_request(e.to_string()))?;
    let context = state.resolver.resolve(&id)?;
    let (definition, _) = context.map.lookup(kind, address).ok_or_else(|| {
        SatProxyError::UnresolvedAddress(format!("{id} {} {address}", kind.short_code()))
    })?;

    let view = state.store.view(&id);
    Ok(Json(SuccessResponse::new(register_view(
        definition,
        view.as_ref(),
    ))))
}

/// Feed one satellite payload through decode and reconciliation
///
/// @route POST /api/outstations/{id}/payload
/// @input Path(id): String - Outstation the payload was received for
/// @input Bytes - Raw compact frame
/// @output Json<SuccessResponse<ReconcileResult>>
/// @status 400 - Malformed payload (dropped)
/// @status 404 - Unknown outstation (parked for replay after a reload)
/// @side-effects Updates the register store
pub async fn ingest_payload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SuccessResponse<ReconcileResult>>, AppError> {
    debug!("Payload for {} ({} bytes)", id, body.len());
    let result = state.pipeline.ingest(&id, body)?;
    Ok(Json(SuccessResponse::new(result)))
}

/// Take the writes queued by Modbus masters
///
/// @route GET /api/outstations/{id}/writes
/// @input Path(id): String - Outstation id
/// @output Json<SuccessResponse<Vec<WriteCommand>>> - Oldest first
/// @status 404 - Outstation not configured
/// @side-effects Empties the outstation's write queue
pub async fn drain_writes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<Vec<WriteCommand>>>, AppError> {
    if !state.resolver.contains(&id) {
        return Err(SatProxyError::unknown_outstation(id).into());
    }
    Ok(Json(SuccessResponse::new(state.writes.drain(&id))))
}
