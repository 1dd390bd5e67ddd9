/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

// Relay defaults
pub const DEFAULT_FFMPEG_COMMAND: &str = "ffmpeg";
pub const DEFAULT_RTSP_TRANSPORT: &str = "tcp";
pub const DEFAULT_STOP_GRACE_PERIOD_SECS: u64 = 5;
pub const DEFAULT_RECONNECT_PAUSE_MS: u64 = 1000;
/// Bytes requested from the transcoder stdout per read
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Outbound chunks buffered per video sink before the oldest is dropped
pub const DEFAULT_SINK_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_CONTROL_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_SINK_WRITE_TIMEOUT_SECS: u64 = 5;
/// Stderr lines kept per transcoder for classification
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 200;
pub const DEFAULT_VERIFY_COMMAND: &str = "ffprobe";
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 10;

// Snapshot defaults
pub const DEFAULT_SNAPSHOT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_SNAPSHOT_WIDTH: u32 = 320;
pub const DEFAULT_SNAPSHOT_HEIGHT: u32 = 240;
pub const DEFAULT_SNAPSHOT_QUALITY: u8 = 85;
pub const DEFAULT_SNAPSHOT_CAPTURE_TIMEOUT_SECS: u64 = 10;
