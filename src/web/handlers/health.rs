//! Health check HTTP handler

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use crate::web::AppState;

/// Liveness plus a little relay context
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "active_relays": state.relay_registry.len().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
