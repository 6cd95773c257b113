//! API Route Configuration
//!
//! Central route definition for all satellite proxy API endpoints

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

use crate::api::admin_handlers::{get_log_level, get_stats, reload_config, set_log_level};
use crate::api::health_handlers::health_check;
use crate::api::outstation_handlers::{
    drain_writes, get_outstation, get_register, ingest_payload, list_outstations, list_registers,
};

/// Create all API routes for the satellite proxy
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Outstations
        .route("/api/outstations", get(list_outstations))
        .route("/api/outstations/{id}", get(get_outstation))
        .route("/api/outstations/{id}/registers", get(list_registers))
        .route(
            "/api/outstations/{id}/registers/{kind}/{address}",
            get(get_register),
        )
        .route("/api/outstations/{id}/payload", post(ingest_payload))
        .route("/api/outstations/{id}/writes", get(drain_writes))
        // Admin
        .route("/api/stats", get(get_stats))
        .route("/api/reload", post(reload_config))
        .route("/api/log-level", get(get_log_level).put(set_log_level))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
