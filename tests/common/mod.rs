//! Shared fixtures: a scripted transcoder standing in for FFmpeg, and helpers
//! for draining sink queues.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use rtsp_relay::config::Config;
use rtsp_relay::errors::{RelayError, RelayResult, SnapshotError, SnapshotResult};
use rtsp_relay::models::{Quality, RelayEvent};
use rtsp_relay::relay::{RelayRegistry, RelaySettings, SinkReceiver};
use rtsp_relay::services::{
    ChunkRead, FrameCapturer, InMemoryStreamStore, SnapshotService, SourceVerifier, Transcoder,
    TranscoderFactory,
};
use rtsp_relay::web::AppState;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens after the scripted chunks run out
#[derive(Debug, Clone)]
pub enum ScriptEnd {
    /// Keep stdout open without producing anything
    Hold,
    /// Start over from the first chunk
    Repeat,
    /// Close stdout, as a crashed process would
    Exit,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub chunks: Vec<Bytes>,
    pub interval: Duration,
    pub end: ScriptEnd,
    pub diagnostics: String,
    pub fail_start: bool,
    /// How long `stop` takes before the process counts as gone
    pub stop_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            chunks: vec![Bytes::from_static(b"chunk-0"), Bytes::from_static(b"chunk-1")],
            interval: Duration::from_millis(2),
            end: ScriptEnd::Hold,
            diagnostics: String::new(),
            fail_start: false,
            stop_delay: Duration::ZERO,
        }
    }
}

/// Process-level counters shared by every transcoder a factory creates
#[derive(Debug, Default)]
pub struct TranscoderStats {
    created: AtomicUsize,
    started: AtomicUsize,
    alive: AtomicUsize,
    max_alive: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl TranscoderStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

pub struct ScriptedTranscoder {
    script: Script,
    stats: Arc<TranscoderStats>,
    position: usize,
    running: bool,
    stopped: bool,
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn start(&mut self) -> RelayResult<()> {
        if self.running {
            return Ok(());
        }
        if self.script.fail_start {
            return Err(RelayError::SpawnFailed {
                program: "scripted".to_string(),
                message: "No such file or directory".to_string(),
            });
        }
        self.running = true;
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        let alive = self.stats.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_alive.fetch_max(alive, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.running
    }

    async fn read_chunk(&mut self) -> RelayResult<ChunkRead> {
        if !self.running {
            return Err(RelayError::NotRunning);
        }

        if self.position >= self.script.chunks.len() {
            match self.script.end {
                ScriptEnd::Hold => std::future::pending::<()>().await,
                ScriptEnd::Repeat if !self.script.chunks.is_empty() => self.position = 0,
                ScriptEnd::Repeat | ScriptEnd::Exit => return Ok(ChunkRead::Eof),
            }
        }

        tokio::time::sleep(self.script.interval).await;
        let chunk = self.script.chunks[self.position].clone();
        self.position += 1;
        Ok(ChunkRead::Data(chunk))
    }

    fn read_diagnostics(&self) -> String {
        self.script.diagnostics.clone()
    }

    async fn stop(&mut self) {
        if self.running && !self.stopped {
            tokio::time::sleep(self.script.stop_delay).await;
            self.stats.alive.fetch_sub(1, Ordering::SeqCst);
        }
        self.running = false;
        self.stopped = true;
    }
}

/// Factory handing out [`ScriptedTranscoder`]s; the script can be swapped
/// between relay starts
pub struct ScriptedFactory {
    script: Mutex<Script>,
    stats: Arc<TranscoderStats>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            stats: Arc::new(TranscoderStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<TranscoderStats> {
        self.stats.clone()
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }
}

impl TranscoderFactory for ScriptedFactory {
    fn create(&self, url: &str, _quality: Quality) -> Box<dyn Transcoder> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        self.stats.urls.lock().unwrap().push(url.to_string());
        Box::new(ScriptedTranscoder {
            script: self.script.lock().unwrap().clone(),
            stats: self.stats.clone(),
            position: 0,
            running: false,
            stopped: false,
        })
    }
}

pub fn fast_settings() -> RelaySettings {
    RelaySettings {
        quality: Quality::Low,
        reconnect_pause: Duration::from_millis(10),
    }
}

/// Next queued item, failing the test if nothing arrives in time
pub async fn next<T>(receiver: &mut SinkReceiver<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, receiver.recv())
        .await
        .expect("timed out waiting for sink item")
        .expect("sink queue closed")
}

/// Skip events until one matches
pub async fn next_matching<F>(receiver: &mut SinkReceiver<RelayEvent>, mut predicate: F) -> RelayEvent
where
    F: FnMut(&RelayEvent) -> bool,
{
    loop {
        let event = next(receiver).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// Poll `condition` until it holds or the timeout elapses
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Frame capturer returning a fixed JPEG, or failing when `fail` is set
#[derive(Debug, Default)]
pub struct StaticCapturer {
    fail: bool,
    calls: AtomicUsize,
}

impl StaticCapturer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameCapturer for StaticCapturer {
    async fn capture_frame(&self, _url: &str) -> SnapshotResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SnapshotError::CaptureFailed("exit status: 1".to_string()));
        }
        Ok(Bytes::from_static(&[0xff, 0xd8, 0xff, 0xd9]))
    }
}

/// Source verifier with a fixed answer that records what it was asked about
#[derive(Debug, Default)]
pub struct FixedVerifier {
    reachable: bool,
    checked: Mutex<Vec<String>>,
}

impl FixedVerifier {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self {
            reachable: true,
            ..Self::default()
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceVerifier for FixedVerifier {
    async fn is_reachable(&self, url: &str) -> bool {
        self.checked.lock().unwrap().push(url.to_string());
        self.reachable
    }
}

/// Application state wired to scripted collaborators
pub fn app_state(factory: &Arc<ScriptedFactory>, capturer: Arc<StaticCapturer>) -> AppState {
    let config = Config::default();
    let registry = Arc::new(RelayRegistry::new(factory.clone(), fast_settings()));
    let snapshots = Arc::new(SnapshotService::new(capturer, config.snapshot.clone()));
    AppState::new(
        config,
        registry,
        Arc::new(InMemoryStreamStore::new()),
        snapshots,
    )
}
