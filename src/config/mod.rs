use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub mod defaults;
pub mod duration_serde;

pub use defaults::*;

use crate::models::Quality;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Stream records loaded into the store at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL, used to build `ws_url` for stream records
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
    #[serde(default)]
    pub default_quality: Quality,
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,
    /// Time between SIGTERM and a forced kill
    #[serde(default = "default_stop_grace_period", with = "duration_serde::duration")]
    pub stop_grace_period: Duration,
    #[serde(default = "default_reconnect_pause", with = "duration_serde::duration")]
    pub reconnect_pause: Duration,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    #[serde(default = "default_control_queue_capacity")]
    pub control_queue_capacity: usize,
    /// A socket write that takes longer than this detaches the sink
    #[serde(default = "default_sink_write_timeout", with = "duration_serde::duration")]
    pub sink_write_timeout: Duration,
    #[serde(default = "default_diagnostic_lines")]
    pub diagnostic_lines: usize,
    /// Check that a source answers before a record is created or its URL
    /// changed
    #[serde(default)]
    pub verify_sources: bool,
    /// Stream inspector run by the source check
    #[serde(default = "default_verify_command")]
    pub verify_command: String,
    /// Past this the check gives up and accepts any `rtsp://` URL
    #[serde(default = "default_verify_timeout", with = "duration_serde::duration")]
    pub verify_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_cache_ttl", with = "duration_serde::duration")]
    pub cache_ttl: Duration,
    #[serde(default = "default_snapshot_width")]
    pub width: u32,
    #[serde(default = "default_snapshot_height")]
    pub height: u32,
    /// Reported JPEG quality
    #[serde(default = "default_snapshot_quality")]
    pub quality: u8,
    #[serde(default = "default_snapshot_capture_timeout", with = "duration_serde::duration")]
    pub capture_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSeed {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub url: String,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_ffmpeg_command() -> String {
    DEFAULT_FFMPEG_COMMAND.to_string()
}

fn default_rtsp_transport() -> String {
    DEFAULT_RTSP_TRANSPORT.to_string()
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(DEFAULT_STOP_GRACE_PERIOD_SECS)
}

fn default_reconnect_pause() -> Duration {
    Duration::from_millis(DEFAULT_RECONNECT_PAUSE_MS)
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_sink_queue_capacity() -> usize {
    DEFAULT_SINK_QUEUE_CAPACITY
}

fn default_control_queue_capacity() -> usize {
    DEFAULT_CONTROL_QUEUE_CAPACITY
}

fn default_sink_write_timeout() -> Duration {
    Duration::from_secs(DEFAULT_SINK_WRITE_TIMEOUT_SECS)
}

fn default_diagnostic_lines() -> usize {
    DEFAULT_DIAGNOSTIC_LINES
}

fn default_verify_command() -> String {
    DEFAULT_VERIFY_COMMAND.to_string()
}

fn default_verify_timeout() -> Duration {
    Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS)
}

fn default_snapshot_cache_ttl() -> Duration {
    Duration::from_secs(DEFAULT_SNAPSHOT_CACHE_TTL_SECS)
}

fn default_snapshot_width() -> u32 {
    DEFAULT_SNAPSHOT_WIDTH
}

fn default_snapshot_height() -> u32 {
    DEFAULT_SNAPSHOT_HEIGHT
}

fn default_snapshot_quality() -> u8 {
    DEFAULT_SNAPSHOT_QUALITY
}

fn default_snapshot_capture_timeout() -> Duration {
    Duration::from_secs(DEFAULT_SNAPSHOT_CAPTURE_TIMEOUT_SECS)
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ffmpeg_command: default_ffmpeg_command(),
            default_quality: Quality::default(),
            rtsp_transport: default_rtsp_transport(),
            stop_grace_period: default_stop_grace_period(),
            reconnect_pause: default_reconnect_pause(),
            chunk_size: default_chunk_size(),
            sink_queue_capacity: default_sink_queue_capacity(),
            control_queue_capacity: default_control_queue_capacity(),
            sink_write_timeout: default_sink_write_timeout(),
            diagnostic_lines: default_diagnostic_lines(),
            verify_sources: false,
            verify_command: default_verify_command(),
            verify_timeout: default_verify_timeout(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_snapshot_cache_ttl(),
            width: default_snapshot_width(),
            height: default_snapshot_height(),
            quality: default_snapshot_quality(),
            capture_timeout: default_snapshot_capture_timeout(),
        }
    }
}

impl Config {
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.web.port, DEFAULT_PORT);
        assert_eq!(config.relay.default_quality, Quality::Medium);
        assert_eq!(config.relay.stop_grace_period, Duration::from_secs(5));
        assert_eq!(config.relay.reconnect_pause, Duration::from_secs(1));
        assert_eq!(config.relay.chunk_size, 4096);
        assert_eq!(config.snapshot.cache_ttl, Duration::from_secs(300));
        assert_eq!((config.snapshot.width, config.snapshot.height), (320, 240));
        assert!(config.streams.is_empty());
        assert!(!config.relay.verify_sources);
        assert_eq!(config.relay.verify_command, "ffprobe");
        assert_eq!(config.relay.verify_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_parses_sections_and_seeds() {
        let config: Config = toml::from_str(
            r#"
            [web]
            port = 9000

            [relay]
            ffmpeg_command = "/usr/local/bin/ffmpeg"
            default_quality = "high"
            stop_grace_period = "2s"
            sink_write_timeout = 3
            verify_sources = true

            [[streams]]
            url = "rtsp://cam1.local/live"
            label = "Garage"

            [[streams]]
            id = "6f1c2f0e-8d4b-4c1a-9a57-3f3b3b0d9a10"
            url = "rtsp://cam2.local/live"
            "#,
        )
        .unwrap();

        assert_eq!(config.web.port, 9000);
        assert_eq!(config.web.host, DEFAULT_HOST);
        assert_eq!(config.relay.ffmpeg_command, "/usr/local/bin/ffmpeg");
        assert_eq!(config.relay.default_quality, Quality::High);
        assert_eq!(config.relay.stop_grace_period, Duration::from_secs(2));
        assert_eq!(config.relay.sink_write_timeout, Duration::from_secs(3));
        assert!(config.relay.verify_sources);
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].label.as_deref(), Some("Garage"));
        assert!(config.streams[1].id.is_some());
    }

    #[test]
    fn test_load_from_file_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        let config = Config::load_from_file(path_str).unwrap();
        assert_eq!(config.web.port, DEFAULT_PORT);
        assert!(path.exists());

        // The written file round-trips through the loader
        let reloaded = Config::load_from_file(path_str).unwrap();
        assert_eq!(reloaded.relay.stop_grace_period, config.relay.stop_grace_period);
    }
}
