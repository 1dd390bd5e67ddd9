//! Reachability check for stream sources
//!
//! Runs the configured stream inspector against the source and accepts it
//! when the inspector exits cleanly. When the inspector is missing or does
//! not answer in time, the check falls back to the URL scheme alone.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::services::ffmpeg_command_builder::FFmpegCommandBuilder;
use crate::utils::UrlUtils;

/// Decides whether a source is worth saving
#[async_trait]
pub trait SourceVerifier: Send + Sync {
    async fn is_reachable(&self, url: &str) -> bool;
}

/// Runs an external inspector and reads only its exit status
#[derive(Debug, Clone)]
pub struct CommandSourceVerifier {
    program: String,
    builder: FFmpegCommandBuilder,
    timeout: Duration,
}

impl CommandSourceVerifier {
    pub fn new(program: impl Into<String>, builder: FFmpegCommandBuilder, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            builder,
            timeout,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            &config.verify_command,
            FFmpegCommandBuilder::from_config(config),
            config.verify_timeout,
        )
    }
}

#[async_trait]
impl SourceVerifier for CommandSourceVerifier {
    async fn is_reachable(&self, url: &str) -> bool {
        let masked = UrlUtils::obfuscate_credentials(url);
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(self.builder.build_inspect_args(url));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.status()).await {
            Ok(Ok(status)) => {
                debug!(
                    source = %masked,
                    event = "source_checked",
                    status = %status,
                    "Source check finished"
                );
                status.success()
            }
            Ok(Err(e)) => {
                warn!(
                    source = %masked,
                    event = "source_check_unavailable",
                    program = %self.program,
                    error = %e,
                    "Source check could not run, accepting by scheme"
                );
                UrlUtils::is_rtsp_url(url)
            }
            Err(_) => {
                info!(
                    source = %masked,
                    event = "source_check_timeout",
                    timeout = ?self.timeout,
                    "Source check timed out, accepting by scheme"
                );
                UrlUtils::is_rtsp_url(url)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn verifier(program: &str, timeout: Duration) -> CommandSourceVerifier {
        CommandSourceVerifier::new(program, FFmpegCommandBuilder::default(), timeout)
    }

    #[tokio::test]
    async fn test_exit_status_decides() {
        let accepting = verifier("true", Duration::from_secs(5));
        assert!(accepting.is_reachable("rtsp://cam.local/live").await);

        let refusing = verifier("false", Duration::from_secs(5));
        assert!(!refusing.is_reachable("rtsp://cam.local/live").await);
    }

    #[tokio::test]
    async fn test_missing_inspector_falls_back_to_scheme() {
        let missing = verifier("/nonexistent/inspector-binary", Duration::from_secs(5));
        assert!(missing.is_reachable("rtsp://cam.local/live").await);
        assert!(!missing.is_reachable("http://cam.local/live").await);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-inspector");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let slow = verifier(script.to_str().unwrap(), Duration::from_millis(100));
        let started = std::time::Instant::now();
        assert!(slow.is_reachable("rtsp://cam.local/live").await);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
