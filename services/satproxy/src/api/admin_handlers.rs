//! Admin API Handlers
//!
//! Counters, configuration reload and runtime log level.

use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::api::dto::{LogLevelRequest, LogLevelResponse, ServiceStats};
use crate::app_state::{AppState, ReloadSummary};
use common::{AppError, SuccessResponse};

/// Ingest and Modbus counters
///
/// @route GET /api/stats
/// @output Json<SuccessResponse<ServiceStats>>
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse<ServiceStats>>, AppError> {
    Ok(Json(SuccessResponse::new(ServiceStats {
        ingest: state.pipeline.stats(),
        modbus: state.modbus.stats().snapshot(),
        pending_writes: state.writes.total_pending(),
        generation: state.resolver.generation(),
    })))
}

/// Re-read the configuration file
///
/// @route POST /api/reload
/// @output Json<SuccessResponse<ReloadSummary>>
/// @status 400 - Configuration unreadable or inconsistent; the running mapping is kept
/// @side-effects Swaps the register maps, drops values of removed definitions,
///               replays parked payloads
pub async fn reload_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse<ReloadSummary>>, AppError> {
    let summary = tokio::task::spawn_blocking(move || state.reload())
        .await
        .map_err(|e| AppError::internal_error(format!("Reload task failed: {}", e)))??;
    Ok(Json(SuccessResponse::new(summary)))
}

/// Change the log filter at runtime
///
/// @route PUT /api/log-level
/// @input Json<LogLevelRequest> - `{"level": "debug"}`
/// @output Json<SuccessResponse<LogLevelResponse>>
/// @status 400 - Invalid filter or logging not initialized
pub async fn set_log_level(
    Json(request): Json<LogLevelRequest>,
) -> Result<Json<SuccessResponse<LogLevelResponse>>, AppError> {
    common::logging::set_log_level(&request.level).map_err(AppError::bad_request)?;
    Ok(Json(SuccessResponse::new(LogLevelResponse {
        level: common::logging::get_log_level(),
    })))
}

/// Current log filter
///
/// @route GET /api/log-level
/// @output Json<SuccessResponse<LogLevelResponse>>
pub async fn get_log_level() -> Result<Json<SuccessResponse<LogLevelResponse>>, AppError> {
    Ok(Json(SuccessResponse::new(LogLevelResponse {
        level: common::logging::get_log_level(),
    })))
}
