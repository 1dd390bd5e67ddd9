//! One relay per source: a transcoder, its lifecycle state machine and the
//! subscribers its output fans out to.
//!
//! Lifecycle changes (start, stop, shutdown) are serialized by the relay's
//! own lock. The fan-out loop runs as an independent task that owns the
//! transcoder; stopping cancels the loop and joins it, and the loop stops
//! the transcoder on its way out.
//!
//! Subscribers join and leave through [`super::RelayRegistry`], which owns
//! eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::connection::{ConnectionId, ControlSink, Subscriber};
use super::sink_queue::PushOutcome;
use crate::config::RelayConfig;
use crate::errors::{RelayError, RelayResult};
use crate::models::{
    CommandParseError, ControlCommand, ErrorCode, Quality, RelayEvent, RelayState, RelaySummary,
    StatusPhase,
};
use crate::services::error_classifier::classify_diagnostics;
use crate::services::ffmpeg_wrapper::{ChunkRead, Transcoder, TranscoderFactory};
use crate::utils::UrlUtils;

/// Per-relay tuning
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub quality: Quality,
    pub reconnect_pause: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            quality: config.default_quality,
            reconnect_pause: config.reconnect_pause,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// A running fan-out task
struct Playback {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// Set by the loop once the transcoder hit EOF
    exited: Arc<AtomicBool>,
}

impl Playback {
    fn is_active(&self) -> bool {
        !self.exited.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Cancel the loop and wait for it to release the transcoder
    async fn shutdown(self, key: &str) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            error!(
                relay_key = %key,
                event = "fan_out_panicked",
                generation = self.generation,
                "Fan-out task panicked"
            );
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    playback: Option<Playback>,
    generation: u64,
    /// Evicted from the registry; never starts again
    retired: bool,
}

pub struct Relay {
    key: String,
    /// `key` with credentials masked, for logs and summaries
    display_key: String,
    url: String,
    masked_url: String,
    settings: RelaySettings,
    factory: Arc<dyn TranscoderFactory>,
    state: watch::Sender<RelayState>,
    subscribers: RwLock<HashMap<ConnectionId, Subscriber>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Relay {
    pub fn new(
        key: impl Into<String>,
        url: impl Into<String>,
        settings: RelaySettings,
        factory: Arc<dyn TranscoderFactory>,
    ) -> Self {
        let key = key.into();
        let url = url.into();
        Self {
            display_key: UrlUtils::obfuscate_credentials(&key),
            key,
            masked_url: UrlUtils::obfuscate_credentials(&url),
            url,
            settings,
            factory,
            state: watch::Sender::new(RelayState::Idle),
            subscribers: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_key(&self) -> &str {
        &self.display_key
    }

    /// Source URL with credentials masked
    pub fn masked_url(&self) -> &str {
        &self.masked_url
    }

    pub fn quality(&self) -> Quality {
        self.settings.quality
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RelayState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(
                relay_key = %self.display_key,
                event = "state_change",
                from = %previous,
                to = %state,
                "Relay state changed"
            );
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn summary(&self) -> RelaySummary {
        let subscribers = self.subscribers.read().await;
        let video_sinks = subscribers
            .values()
            .filter(|s| matches!(s, Subscriber::Video(_)))
            .count();
        RelaySummary {
            key: self.display_key.clone(),
            url: self.masked_url.clone(),
            state: self.state(),
            quality: self.settings.quality,
            video_sinks,
            control_sinks: subscribers.len() - video_sinks,
        }
    }

    pub(crate) async fn add_subscriber(&self, subscriber: Subscriber) {
        let id = subscriber.id();
        let kind = subscriber.kind();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, subscriber);
        info!(
            relay_key = %self.display_key,
            event = "attach",
            connection = %id,
            kind = %kind,
            subscribers = subscribers.len(),
            "Connection attached"
        );
    }

    pub(crate) async fn remove_subscriber(&self, id: ConnectionId) -> usize {
        let mut subscribers = self.subscribers.write().await;
        if let Some(subscriber) = subscribers.remove(&id) {
            info!(
                relay_key = %self.display_key,
                event = "detach",
                connection = %id,
                kind = %subscriber.kind(),
                subscribers = subscribers.len(),
                "Connection detached"
            );
        }
        subscribers.len()
    }

    /// Start unless a start is already underway or playing
    pub(crate) async fn ensure_running(self: &Arc<Self>) {
        if self.state().is_restartable() {
            // start failures are already broadcast to control sinks
            let _ = self.start().await;
        }
    }

    /// Spawn the transcoder and the fan-out loop. Idempotent while playing.
    pub async fn start(self: &Arc<Self>) -> RelayResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.retired {
            debug!(relay_key = %self.display_key, event = "start_refused", "Relay has been shut down");
            return Err(RelayError::Closed);
        }
        if lifecycle.playback.as_ref().is_some_and(Playback::is_active) {
            debug!(relay_key = %self.display_key, event = "start_skipped", "Relay already playing");
            return Ok(());
        }
        if let Some(stale) = lifecycle.playback.take() {
            stale.shutdown(&self.display_key).await;
        }

        self.set_state(RelayState::Starting);
        info!(
            relay_key = %self.display_key,
            event = "starting",
            source = %self.masked_url,
            quality = %self.settings.quality,
            "Starting relay"
        );

        let mut transcoder = self.factory.create(&self.url, self.settings.quality);
        if let Err(e) = transcoder.start().await {
            transcoder.stop().await;
            self.set_state(RelayState::Ended);
            error!(
                relay_key = %self.display_key,
                event = "start_failed",
                source = %self.masked_url,
                error = %e,
                "Failed to start transcoder"
            );
            self.broadcast_event(RelayEvent::error(
                ErrorCode::FfmpegStartFailed,
                "Failed to start video stream",
            ))
            .await;
            return Err(e);
        }

        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));

        self.set_state(RelayState::Playing);
        let task = tokio::spawn(run_fan_out(
            Arc::downgrade(self),
            transcoder,
            cancel.clone(),
            exited.clone(),
            self.display_key.clone(),
            generation,
        ));
        lifecycle.playback = Some(Playback {
            generation,
            cancel,
            task,
            exited,
        });

        info!(relay_key = %self.display_key, event = "playing", generation, "Relay playing");
        Ok(())
    }

    /// Stop playback and return to Idle. Idempotent, never fails.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(playback) = lifecycle.playback.take() {
            info!(relay_key = %self.display_key, event = "stopping", "Stopping relay");
            playback.shutdown(&self.display_key).await;
        }
        self.set_state(RelayState::Idle);
    }

    /// Final teardown on eviction: Stopping, then Ended, and no restarts.
    /// Returns once the transcoder has stopped.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.retired = true;
        if let Some(playback) = lifecycle.playback.take() {
            self.set_state(RelayState::Stopping);
            playback.shutdown(&self.display_key).await;
        }
        self.set_state(RelayState::Ended);
        info!(relay_key = %self.display_key, event = "ended", "Relay shut down");
    }

    /// Close every subscriber's queue so their sockets wind down
    pub async fn close_subscribers(&self) {
        for subscriber in self.subscribers.read().await.values() {
            subscriber.close();
        }
    }

    /// Send an event to every control sink
    pub async fn broadcast_event(&self, event: RelayEvent) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.values() {
            if let Subscriber::Control(sink) = subscriber {
                sink.notify(event.clone());
            }
        }
    }

    async fn fan_out_chunk(&self, chunk: Bytes) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.values() {
            if let Subscriber::Video(sink) = subscriber
                && sink.deliver(chunk.clone()) == PushOutcome::DroppedOldest
            {
                trace!(
                    relay_key = %self.display_key,
                    event = "chunk_dropped",
                    connection = %sink.id(),
                    dropped = sink.dropped_chunks(),
                    "Video sink behind, dropped oldest chunk"
                );
            }
        }
    }

    /// Execute a JSON control message from `sink`
    pub async fn handle_command(self: &Arc<Self>, sink: &ControlSink, raw: &str) {
        match ControlCommand::parse(raw) {
            Ok(command) => {
                debug!(
                    relay_key = %self.display_key,
                    event = "command",
                    connection = %sink.id(),
                    command = ?command,
                    "Control command received"
                );
                match command {
                    ControlCommand::Start => self.start_for(sink).await,
                    ControlCommand::Stop => self.stop_for(sink).await,
                    ControlCommand::Reconnect => {
                        self.stop_for(sink).await;
                        tokio::time::sleep(self.settings.reconnect_pause).await;
                        self.start_for(sink).await;
                    }
                }
            }
            Err(CommandParseError::InvalidJson) => {
                sink.notify(RelayEvent::error(ErrorCode::InvalidJson, "Invalid JSON format"));
            }
            Err(CommandParseError::UnknownAction(action)) => {
                sink.notify(RelayEvent::error(
                    ErrorCode::InvalidAction,
                    format!("Unknown action: {action}"),
                ));
            }
        }
    }

    async fn start_for(self: &Arc<Self>, sink: &ControlSink) {
        sink.notify(RelayEvent::status(StatusPhase::Connecting));
        match self.start().await {
            Ok(()) => {
                sink.notify(RelayEvent::status(StatusPhase::Playing));
                sink.notify(RelayEvent::VideoStart);
            }
            // Already broadcast to every control sink, this one included
            Err(RelayError::SpawnFailed { .. }) => {}
            Err(e) => {
                warn!(relay_key = %self.display_key, event = "start_error", error = %e, "Start command failed");
                sink.notify(RelayEvent::internal_error());
            }
        }
    }

    async fn stop_for(&self, sink: &ControlSink) {
        self.stop().await;
        sink.notify(RelayEvent::status(StatusPhase::Stopped));
    }

    async fn handle_process_exit(
        &self,
        transcoder: &mut dyn Transcoder,
        exited: &AtomicBool,
        read_error: Option<RelayError>,
    ) {
        exited.store(true, Ordering::SeqCst);
        transcoder.stop().await;

        let code = classify_diagnostics(&transcoder.read_diagnostics());
        self.set_state(RelayState::Ended);
        match read_error {
            Some(e) => warn!(
                relay_key = %self.display_key,
                event = "process_exit",
                diagnostic = ?code,
                error = %e,
                "Transcoder output failed"
            ),
            None => warn!(
                relay_key = %self.display_key,
                event = "process_exit",
                diagnostic = ?code,
                "Transcoder exited"
            ),
        }

        self.broadcast_event(RelayEvent::error_with_details(
            ErrorCode::FfmpegExit,
            "Stream ended unexpectedly",
            code,
        ))
        .await;
    }
}

/// Read chunks until cancelled or the transcoder ends, pushing each chunk to
/// every video sink.
async fn run_fan_out(
    relay: Weak<Relay>,
    mut transcoder: Box<dyn Transcoder>,
    cancel: CancellationToken,
    exited: Arc<AtomicBool>,
    key: String,
    generation: u64,
) {
    let mut chunks: u64 = 0;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            read = transcoder.read_chunk() => Some(read),
        };

        let Some(read) = read else {
            debug!(relay_key = %key, event = "fan_out_cancelled", generation, chunks, "Fan-out cancelled");
            transcoder.stop().await;
            return;
        };

        let Some(relay) = relay.upgrade() else {
            exited.store(true, Ordering::SeqCst);
            transcoder.stop().await;
            return;
        };

        match read {
            Ok(ChunkRead::Data(chunk)) => {
                chunks += 1;
                relay.fan_out_chunk(chunk).await;
            }
            Ok(ChunkRead::Eof) => {
                relay
                    .handle_process_exit(transcoder.as_mut(), &exited, None)
                    .await;
                return;
            }
            Err(e) => {
                relay
                    .handle_process_exit(transcoder.as_mut(), &exited, Some(e))
                    .await;
                return;
            }
        }
    }
}
