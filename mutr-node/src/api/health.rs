//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("mutr-node")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git hash the binary was built from
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Classification engine this instance calls
    pub engine_url: String,
    /// Analyses queued or running in this process
    pub active_analyses: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "mutr-node".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("MUTR_GIT_HASH").to_string(),
        build_timestamp: env!("MUTR_BUILD_TIMESTAMP").to_string(),
        uptime_seconds,
        engine_url: state.engine_url.clone(),
        active_analyses: state.dispatcher.tracked_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
