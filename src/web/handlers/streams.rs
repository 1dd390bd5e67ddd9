//! Stream record HTTP handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{CreateStreamRequest, StreamResponse, UpdateStreamRequest};
use crate::utils::UrlUtils;
use crate::web::{AppState, responses::no_content};

pub(crate) fn parse_stream_id(id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| AppError::not_found("Stream", id))
}

/// Reject a source the configured verifier cannot reach
async fn verify_source(state: &AppState, url: &str) -> AppResult<()> {
    match &state.source_verifier {
        Some(verifier) if !verifier.is_reachable(url.trim()).await => Err(AppError::validation(
            "Invalid RTSP URL or stream not accessible",
        )),
        _ => Ok(()),
    }
}

pub async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    let base_url = &state.config.web.base_url;
    let streams: Vec<StreamResponse> = state
        .stream_store
        .list()
        .await
        .into_iter()
        .map(|stream| StreamResponse::from_stream(stream, base_url))
        .collect();
    Json(streams)
}

pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateStreamRequest>,
) -> AppResult<impl IntoResponse> {
    if UrlUtils::is_rtsp_url(&request.url) {
        verify_source(&state, &request.url).await?;
    }
    let stream = state.stream_store.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(StreamResponse::from_stream(stream, &state.config.web.base_url)),
    ))
}

pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_stream_id(&id)?;
    let stream = state.stream_store.get(id).await?;
    Ok(Json(StreamResponse::from_stream(stream, &state.config.web.base_url)))
}

/// Replace every field of a stream (`PUT`)
pub async fn replace_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateStreamRequest>,
) -> AppResult<impl IntoResponse> {
    update_stream(state, &id, request.into()).await
}

/// Change only the fields present in the body (`PATCH`)
pub async fn patch_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStreamRequest>,
) -> AppResult<impl IntoResponse> {
    update_stream(state, &id, request).await
}

/// A changed URL retires the running relay and the cached thumbnails, so the
/// next viewer connects to the new source
async fn update_stream(
    state: AppState,
    id: &str,
    changes: UpdateStreamRequest,
) -> AppResult<Json<StreamResponse>> {
    let id = parse_stream_id(id)?;
    let before = state.stream_store.get(id).await?;
    if let Some(url) = &changes.url
        && UrlUtils::is_rtsp_url(url)
    {
        verify_source(&state, url).await?;
    }

    let stream = state.stream_store.update(id, changes).await?;
    if stream.url != before.url {
        let key = stream.source_key();
        state.relay_registry.remove(&key).await;
        state.snapshot_service.clear(Some(&key)).await;
    }
    Ok(Json(StreamResponse::from_stream(stream, &state.config.web.base_url)))
}

/// Soft-delete a stream and tear down its relay, if any
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_stream_id(&id)?;
    state.stream_store.delete(id).await?;
    state.relay_registry.remove(&id.to_string()).await;
    state.snapshot_service.clear(Some(&id.to_string())).await;
    Ok(no_content())
}
