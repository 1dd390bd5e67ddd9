use axum::{extract::State, response::IntoResponse};

use crate::web::{AppState, responses::ok};

/// Active relays with their state and subscriber counts. URLs are masked.
pub async fn list_relays(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.relay_registry.summaries().await)
}
