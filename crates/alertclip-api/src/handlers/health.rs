//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub tools_installed: bool,
}

/// Readiness probe: the server can only do useful work when its
/// external tools respond.
pub async fn ready(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let tools_installed = state.tools.check().await.iter().all(|t| t.installed);
    Json(ReadinessResponse {
        status: if tools_installed { "ready" } else { "degraded" }.to_string(),
        tools_installed,
    })
}
