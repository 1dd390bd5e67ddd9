//! Thumbnail snapshots with a TTL cache.
//!
//! A snapshot is one JPEG frame grabbed by a short-lived transcoder run and
//! returned as a base64 data URL. Entries are keyed by stream id and a hash of
//! the source URL, so editing a stream's URL never serves a stale frame.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::errors::{SnapshotError, SnapshotResult};
use crate::services::ffmpeg_command_builder::FFmpegCommandBuilder;
use crate::utils::UrlUtils;

/// Grabs one encoded frame from a source
#[async_trait]
pub trait FrameCapturer: Send + Sync {
    async fn capture_frame(&self, url: &str) -> SnapshotResult<Bytes>;
}

/// One-shot FFmpeg invocation writing a JPEG to stdout
#[derive(Debug, Clone)]
pub struct FFmpegFrameCapturer {
    builder: FFmpegCommandBuilder,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl FFmpegFrameCapturer {
    pub fn new(builder: FFmpegCommandBuilder, config: &SnapshotConfig) -> Self {
        Self {
            builder,
            width: config.width,
            height: config.height,
            timeout: config.capture_timeout,
        }
    }
}

#[async_trait]
impl FrameCapturer for FFmpegFrameCapturer {
    async fn capture_frame(&self, url: &str) -> SnapshotResult<Bytes> {
        let args = self.builder.build_snapshot_args(url, self.width, self.height);
        debug!(event = "capture_command", command = %self.builder.render_masked(&args), "Capturing frame");

        let mut cmd = TokioCommand::new(self.builder.program());
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        // Dropping the output future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(SnapshotError::Timeout(self.timeout)),
        };

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output");
            return Err(SnapshotError::CaptureFailed(format!(
                "{}: {}",
                output.status,
                UrlUtils::mask_credentials_in_text(last_line.trim())
            )));
        }

        Ok(Bytes::from(output.stdout))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// `data:image/jpeg;base64,...`
    pub thumbnail: String,
    pub timestamp: DateTime<Utc>,
    pub size: SnapshotSize,
    pub format: String,
    pub quality: u8,
    pub stream_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCacheStats {
    pub total_cached: usize,
    /// Seconds
    pub cache_ttl: u64,
    pub cached_streams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    stream_id: String,
    url_hash: u64,
}

impl CacheKey {
    fn new(stream_id: &str, url: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        Self {
            stream_id: stream_id.to_string(),
            url_hash: hasher.finish(),
        }
    }
}

struct CachedSnapshot {
    snapshot: Snapshot,
    captured_at: Instant,
}

pub struct SnapshotService {
    capturer: Arc<dyn FrameCapturer>,
    config: SnapshotConfig,
    cache: RwLock<HashMap<CacheKey, CachedSnapshot>>,
}

impl SnapshotService {
    pub fn new(capturer: Arc<dyn FrameCapturer>, config: SnapshotConfig) -> Self {
        Self {
            capturer,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached snapshot for a stream, capturing a new frame when missing,
    /// expired or `force_refresh` is set
    pub async fn get_snapshot(
        &self,
        stream_id: &str,
        url: &str,
        force_refresh: bool,
    ) -> SnapshotResult<Snapshot> {
        let key = CacheKey::new(stream_id, url);

        if !force_refresh
            && let Some(cached) = self.cache.read().await.get(&key)
            && cached.captured_at.elapsed() < self.config.cache_ttl
        {
            debug!(stream_id = %stream_id, event = "snapshot_cache_hit", "Returning cached snapshot");
            return Ok(cached.snapshot.clone());
        }

        info!(stream_id = %stream_id, event = "snapshot_capture", "Capturing snapshot");
        let image = self.capturer.capture_frame(url).await.inspect_err(|e| {
            warn!(
                stream_id = %stream_id,
                event = "snapshot_failed",
                source = %UrlUtils::obfuscate_credentials(url),
                error = %e,
                "Failed to capture snapshot"
            );
        })?;

        let snapshot = Snapshot {
            thumbnail: format!("data:image/jpeg;base64,{}", STANDARD.encode(&image)),
            timestamp: Utc::now(),
            size: SnapshotSize {
                width: self.config.width,
                height: self.config.height,
            },
            format: "jpeg".to_string(),
            quality: self.config.quality,
            stream_id: stream_id.to_string(),
        };

        self.cache.write().await.insert(
            key,
            CachedSnapshot {
                snapshot: snapshot.clone(),
                captured_at: Instant::now(),
            },
        );
        Ok(snapshot)
    }

    /// Drop cached snapshots for one stream, or all of them. Returns how many
    /// entries were removed.
    pub async fn clear(&self, stream_id: Option<&str>) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        match stream_id {
            Some(id) => {
                cache.retain(|key, _| key.stream_id != id);
                info!(stream_id = %id, event = "snapshot_cache_cleared", "Cleared snapshot cache");
            }
            None => {
                cache.clear();
                info!(event = "snapshot_cache_cleared", "Cleared all snapshot cache");
            }
        }
        before - cache.len()
    }

    pub async fn stats(&self) -> SnapshotCacheStats {
        let cache = self.cache.read().await;
        let cached_streams: BTreeSet<String> =
            cache.keys().map(|key| key.stream_id.clone()).collect();
        SnapshotCacheStats {
            total_cached: cache.len(),
            cache_ttl: self.config.cache_ttl.as_secs(),
            cached_streams: cached_streams.into_iter().collect(),
        }
    }
}
