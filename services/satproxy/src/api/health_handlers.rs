//! Health Check API Handlers

use axum::{extract::State, response::Json};
use chrono::Utc;
use std::sync::Arc;

use crate::api::dto::HealthStatus;
use crate::app_state::AppState;
use common::{AppError, ServiceStatus, SuccessResponse};

/// Health check endpoint
///
/// Degraded while any reporting outstation is stale.
///
/// @route GET /health
/// @output Json<SuccessResponse<HealthStatus>> - Service health
/// @side-effects None (read-only operation)
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse<HealthStatus>>, AppError> {
    let now = Utc::now();
    let resolver = state.resolver.load();
    let stale_outstations = state
        .store
        .list_outstations()
        .iter()
        .filter(|s| s.stale && resolver.contains(&s.outstation_id))
        .count();

    let status = if stale_outstations == 0 {
        ServiceStatus::Healthy
    } else {
        ServiceStatus::Degraded
    };

    Ok(Json(SuccessResponse::new(HealthStatus {
        status,
        service: state.config().service.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (now - state.started_at).num_seconds(),
        outstations: resolver.len(),
        stale_outstations,
        generation: resolver.generation(),
        timestamp: now.to_rfc3339(),
    })))
}
