//! Transcoder process wrapper
//!
//! [`FFmpegProcess`] owns one external transcoder bound to one source URL. Its
//! stdout is read chunk by chunk by the relay fan-out loop; its stderr is
//! drained continuously by a task the process owns, cancelled and joined on
//! [`Transcoder::stop`]. The relay only sees the [`Transcoder`] trait so tests
//! can substitute a scripted implementation.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::errors::{RelayError, RelayResult};
use crate::models::Quality;
use crate::services::ffmpeg_command_builder::FFmpegCommandBuilder;
use crate::utils::UrlUtils;

/// How long `stop` waits for the stderr drain to reach EOF before aborting it
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_millis(500);
/// Longest stderr line kept before it is split
const MAX_DIAGNOSTIC_LINE_BYTES: usize = 4096;

/// Result of one stdout read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRead {
    Data(Bytes),
    Eof,
}

/// A running (or startable) transcoder bound to one source
#[async_trait]
pub trait Transcoder: Send {
    /// Spawn the process. Calling it on a started transcoder is a no-op.
    async fn start(&mut self) -> RelayResult<()>;

    /// Whether the OS process is still alive
    fn is_alive(&mut self) -> bool;

    /// Next block of output, or `Eof` once the process closed stdout.
    ///
    /// Must be cancel safe: the fan-out loop races it against cancellation.
    async fn read_chunk(&mut self) -> RelayResult<ChunkRead>;

    /// Accumulated stderr text, credentials masked
    fn read_diagnostics(&self) -> String;

    /// Terminate the process and release every handle. Never fails.
    async fn stop(&mut self);
}

/// Creates transcoders for relays
pub trait TranscoderFactory: Send + Sync {
    fn create(&self, url: &str, quality: Quality) -> Box<dyn Transcoder>;
}

/// Process tuning shared by every transcoder a factory creates
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub chunk_size: usize,
    pub stop_grace_period: Duration,
    pub diagnostic_lines: usize,
}

impl ProcessSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            stop_grace_period: config.stop_grace_period,
            diagnostic_lines: config.diagnostic_lines.max(1),
        }
    }
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Bounded tail of stderr lines
#[derive(Debug)]
struct DiagnosticLog {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl DiagnosticLog {
    fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.min(64)),
            max_lines,
        }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

fn lock_log(log: &Mutex<DiagnosticLog>) -> MutexGuard<'_, DiagnosticLog> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// FFmpeg (or compatible) subprocess streaming to stdout
pub struct FFmpegProcess {
    program: String,
    args: Vec<String>,
    masked_url: String,
    quality: Quality,
    settings: ProcessSettings,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    read_buffer: Vec<u8>,
    stderr_task: Option<JoinHandle<()>>,
    diagnostics: Arc<Mutex<DiagnosticLog>>,
    /// Bytes read from stdout, reported when the stream ends
    bytes_read: u64,
}

impl FFmpegProcess {
    /// Relay process for `url` built from the standard argument list
    pub fn new(
        builder: &FFmpegCommandBuilder,
        url: &str,
        quality: Quality,
        settings: ProcessSettings,
    ) -> Self {
        let args = builder.build_stream_args(url, quality);
        Self::with_command(builder.program(), args, url, quality, settings)
    }

    /// Process running an explicit program and argument list
    pub fn with_command(
        program: impl Into<String>,
        args: Vec<String>,
        url: &str,
        quality: Quality,
        settings: ProcessSettings,
    ) -> Self {
        let diagnostics = Arc::new(Mutex::new(DiagnosticLog::new(settings.diagnostic_lines)));
        Self {
            program: program.into(),
            args,
            masked_url: UrlUtils::obfuscate_credentials(url),
            quality,
            read_buffer: vec![0u8; settings.chunk_size],
            settings,
            child: None,
            stdout: None,
            stderr_task: None,
            diagnostics,
            bytes_read: 0,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn masked_command(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&UrlUtils::mask_credentials_in_text(arg));
        }
        rendered
    }
}

#[async_trait]
impl Transcoder for FFmpegProcess {
    async fn start(&mut self) -> RelayResult<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| RelayError::SpawnFailed {
            program: self.program.clone(),
            message: e.to_string(),
        })?;

        // kill_on_drop reaps the child if we bail out here
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::ProcessFailed("stdout was not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(tokio::spawn(drain_stderr(
                stderr,
                self.diagnostics.clone(),
                self.masked_url.clone(),
            )));
        }

        info!(
            source = %self.masked_url,
            event = "process_started",
            quality = %self.quality,
            pid = ?child.id(),
            "Started FFmpeg process"
        );
        debug!(
            source = %self.masked_url,
            event = "process_command",
            command = %self.masked_command(),
            "FFmpeg command"
        );

        self.stdout = Some(stdout);
        self.child = Some(child);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(
                        source = %self.masked_url,
                        event = "process_exited",
                        status = %status,
                        "FFmpeg process exited"
                    );
                    false
                }
                Err(e) => {
                    warn!(
                        source = %self.masked_url,
                        event = "process_status_failed",
                        error = %e,
                        "Error checking FFmpeg process status"
                    );
                    false
                }
            },
            None => false,
        }
    }

    async fn read_chunk(&mut self) -> RelayResult<ChunkRead> {
        if self.child.is_none() {
            return Err(RelayError::NotRunning);
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(ChunkRead::Eof);
        };

        let n = stdout.read(&mut self.read_buffer).await?;
        if n == 0 {
            info!(
                source = %self.masked_url,
                event = "stdout_closed",
                bytes = self.bytes_read,
                "FFmpeg stdout ended"
            );
            self.stdout = None;
            return Ok(ChunkRead::Eof);
        }

        self.bytes_read += n as u64;
        Ok(ChunkRead::Data(Bytes::copy_from_slice(&self.read_buffer[..n])))
    }

    fn read_diagnostics(&self) -> String {
        lock_log(&self.diagnostics).render()
    }

    async fn stop(&mut self) {
        self.stdout = None;

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(
                        source = %self.masked_url,
                        event = "process_exited",
                        status = %status,
                        "FFmpeg process already exited"
                    );
                }
                _ => {
                    request_termination(&mut child, &self.masked_url);
                    match tokio::time::timeout(self.settings.stop_grace_period, child.wait()).await {
                        Ok(Ok(status)) => {
                            info!(
                                source = %self.masked_url,
                                event = "process_terminated",
                                status = %status,
                                "FFmpeg process terminated"
                            );
                        }
                        Ok(Err(e)) => {
                            warn!(
                                source = %self.masked_url,
                                event = "process_wait_failed",
                                error = %e,
                                "Failed to wait for FFmpeg process"
                            );
                        }
                        Err(_) => {
                            warn!(
                                source = %self.masked_url,
                                event = "process_kill",
                                grace_period = ?self.settings.stop_grace_period,
                                "FFmpeg process ignored SIGTERM, killing"
                            );
                            if let Err(e) = child.kill().await {
                                warn!(
                                    source = %self.masked_url,
                                    event = "process_kill_failed",
                                    error = %e,
                                    "Failed to kill FFmpeg process"
                                );
                            }
                        }
                    }
                }
            }
        }

        if let Some(mut task) = self.stderr_task.take()
            && tokio::time::timeout(STDERR_JOIN_TIMEOUT, &mut task).await.is_err()
        {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for FFmpegProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut()
            && let Err(e) = child.start_kill()
        {
            debug!(
                source = %self.masked_url,
                event = "process_kill_failed",
                error = %e,
                "Failed to kill FFmpeg process in drop"
            );
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child, source: &str) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(
            source = %source,
            event = "sigterm_failed",
            error = %e,
            "Failed to send SIGTERM to FFmpeg process"
        );
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, _source: &str) {
    let _ = child.start_kill();
}

/// Read stderr until EOF, keeping a masked tail of lines.
///
/// FFmpeg separates progress updates with `\r`, so both `\r` and `\n` end a
/// line. Raw bytes are decoded lossily.
async fn drain_stderr(mut stderr: ChildStderr, diagnostics: Arc<Mutex<DiagnosticLog>>, source: String) {
    let mut buf = [0u8; 1024];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(
                    source = %source,
                    event = "stderr_read_failed",
                    error = %e,
                    "Error reading FFmpeg stderr"
                );
                break;
            }
        };

        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                record_line(&pending, &diagnostics, &source);
                pending.clear();
            } else {
                pending.push(byte);
                if pending.len() >= MAX_DIAGNOSTIC_LINE_BYTES {
                    record_line(&pending, &diagnostics, &source);
                    pending.clear();
                }
            }
        }
    }

    record_line(&pending, &diagnostics, &source);
}

fn record_line(raw: &[u8], diagnostics: &Mutex<DiagnosticLog>, source: &str) {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.trim();
    if line.is_empty() {
        return;
    }

    let masked = UrlUtils::mask_credentials_in_text(line);

    // Progress lines would otherwise push real errors out of the tail
    if masked.starts_with("frame=") || masked.starts_with("size=") {
        trace!(source = %source, event = "ffmpeg_progress", line = %masked, "FFmpeg progress");
        return;
    }

    let lower = masked.to_lowercase();
    if lower.contains("error")
        || lower.contains("failed")
        || lower.contains("invalid")
        || lower.contains("refused")
        || lower.contains("unauthorized")
    {
        warn!(source = %source, event = "ffmpeg_stderr", line = %masked, "FFmpeg reported a problem");
    } else {
        debug!(source = %source, event = "ffmpeg_stderr", line = %masked, "FFmpeg output");
    }

    lock_log(diagnostics).push(masked);
}

/// Builds [`FFmpegProcess`] instances for relays
#[derive(Debug, Clone)]
pub struct FFmpegProcessFactory {
    builder: FFmpegCommandBuilder,
    settings: ProcessSettings,
}

impl FFmpegProcessFactory {
    pub fn new(builder: FFmpegCommandBuilder, settings: ProcessSettings) -> Self {
        Self { builder, settings }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            FFmpegCommandBuilder::from_config(config),
            ProcessSettings::from_config(config),
        )
    }

    /// Check if the configured FFmpeg binary runs, returning its version line
    pub async fn detect_version(&self) -> Option<String> {
        let output = TokioCommand::new(self.builder.program())
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
    }
}

impl TranscoderFactory for FFmpegProcessFactory {
    fn create(&self, url: &str, quality: Quality) -> Box<dyn Transcoder> {
        Box::new(FFmpegProcess::new(&self.builder, url, quality, self.settings.clone()))
    }
}
