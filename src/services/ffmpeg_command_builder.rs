//! FFmpeg Command Builder Service
//!
//! Generates transcoder argument lists for live relays (MPEG-TS carrying
//! mpeg1video, as consumed by browser-side JSMpeg players) and for one-shot
//! JPEG snapshots.

use tracing::debug;

use crate::config::RelayConfig;
use crate::models::Quality;
use crate::utils::UrlUtils;

/// Service for building FFmpeg command arguments
#[derive(Debug, Clone)]
pub struct FFmpegCommandBuilder {
    ffmpeg_command: String,
    rtsp_transport: String,
}

impl FFmpegCommandBuilder {
    pub fn new(ffmpeg_command: impl Into<String>, rtsp_transport: impl Into<String>) -> Self {
        Self {
            ffmpeg_command: ffmpeg_command.into(),
            rtsp_transport: rtsp_transport.into(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(&config.ffmpeg_command, &config.rtsp_transport)
    }

    pub fn program(&self) -> &str {
        &self.ffmpeg_command
    }

    /// Build arguments for a continuous relay of `input_url` to stdout
    pub fn build_stream_args(&self, input_url: &str, quality: Quality) -> Vec<String> {
        let mut args = Vec::new();

        self.add_input_args(&mut args, input_url);

        args.extend(
            ["-f", "mpegts", "-codec:v", "mpeg1video", "-an", "-s", "640x480", "-r", "25"]
                .map(String::from),
        );

        let (qscale, bitrate) = quality.encoder_settings();
        args.extend(["-q:v", qscale, "-b:v", bitrate].map(String::from));

        // Low-latency encoder and muxer settings
        args.extend(
            [
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-g",
                "15",
                "-bf",
                "0",
                "-flags",
                "+cgop",
                "-sc_threshold",
                "0",
                "-muxdelay",
                "0.1",
                "-muxpreload",
                "0.1",
            ]
            .map(String::from),
        );

        self.add_output_args(&mut args);

        debug!(
            "Generated relay command with {} arguments: {}",
            args.len(),
            self.render_masked(&args)
        );
        args
    }

    /// Build arguments that grab one scaled JPEG frame to stdout
    pub fn build_snapshot_args(&self, input_url: &str, width: u32, height: u32) -> Vec<String> {
        let mut args = Vec::new();

        self.add_input_args(&mut args, input_url);
        args.extend([
            "-vframes".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={width}:{height}"),
            "-q:v".to_string(),
            "2".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
        ]);
        self.add_output_args(&mut args);

        args
    }

    /// Arguments for a JSON stream listing of `input_url`.
    /// Only the exit status is used.
    pub fn build_inspect_args(&self, input_url: &str) -> Vec<String> {
        let mut args: Vec<String> = ["-v", "quiet", "-print_format", "json", "-show_streams"]
            .map(String::from)
            .to_vec();
        args.extend([
            "-rtsp_transport".to_string(),
            self.rtsp_transport.clone(),
            input_url.to_string(),
        ]);
        args
    }

    /// Full command line with credentials masked, for logs
    pub fn render_masked(&self, args: &[String]) -> String {
        let mut rendered = self.ffmpeg_command.clone();
        for arg in args {
            rendered.push(' ');
            rendered.push_str(&UrlUtils::mask_credentials_in_text(arg));
        }
        rendered
    }

    fn add_input_args(&self, args: &mut Vec<String>, input_url: &str) {
        args.extend([
            "-rtsp_transport".to_string(),
            self.rtsp_transport.clone(),
            "-i".to_string(),
            input_url.to_string(),
        ]);
    }

    fn add_output_args(&self, args: &mut Vec<String>) {
        args.extend(["-y".to_string(), "pipe:1".to_string()]);
    }
}

impl Default for FFmpegCommandBuilder {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}
