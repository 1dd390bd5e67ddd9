//! In-memory stream record store
//!
//! Records are soft-deleted: `delete` clears `is_active`, and inactive
//! records are invisible to `list`, `get` and `resolve`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StreamSeed;
use crate::errors::{StoreError, StoreResult};
use crate::models::{CreateStreamRequest, Stream, UpdateStreamRequest};
use crate::utils::UrlUtils;

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Active records, newest first
    async fn list(&self) -> Vec<Stream>;

    async fn get(&self, id: Uuid) -> StoreResult<Stream>;

    async fn create(&self, request: CreateStreamRequest) -> StoreResult<Stream>;

    /// Apply `changes` to an active record. A new URL is validated first.
    async fn update(&self, id: Uuid, changes: UpdateStreamRequest) -> StoreResult<Stream>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    /// URL for a relay source key, if it names an active record
    async fn resolve(&self, source_key: &str) -> Option<String> {
        let id = Uuid::parse_str(source_key).ok()?;
        self.get(id).await.ok().map(|stream| stream.url)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStreamStore {
    streams: RwLock<HashMap<Uuid, Stream>>,
}

impl InMemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from configuration. Invalid seeds are skipped.
    pub fn from_seeds(seeds: &[StreamSeed]) -> Self {
        let mut streams = HashMap::new();
        for seed in seeds {
            let masked = UrlUtils::obfuscate_credentials(&seed.url);
            if let Err(reason) = UrlUtils::validate_rtsp_url(&seed.url) {
                warn!(source = %masked, event = "seed_skipped", reason = %reason, "Skipping configured stream");
                continue;
            }
            let stream = build_stream(seed.id.unwrap_or_else(Uuid::new_v4), &seed.url, seed.label.clone());
            info!(stream_id = %stream.id, event = "seed_loaded", source = %masked, "Loaded configured stream");
            streams.insert(stream.id, stream);
        }
        Self {
            streams: RwLock::new(streams),
        }
    }
}

/// Trimmed label; blank labels are stored as absent
fn normalize_label(label: Option<String>) -> Option<String> {
    label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}

fn build_stream(id: Uuid, url: &str, label: Option<String>) -> Stream {
    Stream {
        id,
        url: url.trim().to_string(),
        label: normalize_label(label),
        created_at: Utc::now(),
        is_active: true,
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn list(&self) -> Vec<Stream> {
        let streams = self.streams.read().await;
        let mut active: Vec<Stream> = streams.values().filter(|s| s.is_active).cloned().collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        active
    }

    async fn get(&self, id: Uuid) -> StoreResult<Stream> {
        self.streams
            .read()
            .await
            .get(&id)
            .filter(|s| s.is_active)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn create(&self, request: CreateStreamRequest) -> StoreResult<Stream> {
        UrlUtils::validate_rtsp_url(&request.url)
            .map_err(|reason| StoreError::InvalidUrl { reason })?;

        let stream = build_stream(Uuid::new_v4(), &request.url, request.label);
        self.streams.write().await.insert(stream.id, stream.clone());
        info!(
            stream_id = %stream.id,
            event = "stream_created",
            source = %UrlUtils::obfuscate_credentials(&stream.url),
            "Created stream"
        );
        Ok(stream)
    }

    async fn update(&self, id: Uuid, changes: UpdateStreamRequest) -> StoreResult<Stream> {
        if let Some(url) = &changes.url {
            UrlUtils::validate_rtsp_url(url).map_err(|reason| StoreError::InvalidUrl { reason })?;
        }

        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(&id)
            .filter(|s| s.is_active)
            .ok_or(StoreError::NotFound(id))?;

        if let Some(url) = changes.url {
            stream.url = url.trim().to_string();
        }
        if let Some(label) = changes.label {
            stream.label = normalize_label(label);
        }
        info!(
            stream_id = %id,
            event = "stream_updated",
            source = %UrlUtils::obfuscate_credentials(&stream.url),
            "Updated stream"
        );
        Ok(stream.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut streams = self.streams.write().await;
        match streams.get_mut(&id) {
            Some(stream) if stream.is_active => {
                stream.is_active = false;
                info!(stream_id = %id, event = "stream_deactivated", "Deactivated stream");
                Ok(())
            }
            _ => Err(StoreError::NotFound(id)),
        }
    }
}
