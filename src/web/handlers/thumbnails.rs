//! Snapshot HTTP handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use super::streams::parse_stream_id;
use crate::errors::AppResult;
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ThumbnailQuery {
    #[serde(default)]
    pub refresh: bool,
}

pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> AppResult<impl IntoResponse> {
    let id = parse_stream_id(&id)?;
    let stream = state.stream_store.get(id).await?;
    let snapshot = state
        .snapshot_service
        .get_snapshot(&stream.source_key(), &stream.url, query.refresh)
        .await?;
    Ok(Json(snapshot))
}

/// Drop the cached frame; the next thumbnail request captures a new one
pub async fn refresh_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_stream_id(&id)?;
    let stream = state.stream_store.get(id).await?;
    state.snapshot_service.clear(Some(&stream.source_key())).await;
    Ok(Json(json!({
        "message": "Thumbnail cache cleared, next request will generate new thumbnail"
    })))
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.snapshot_service.stats().await)
}
