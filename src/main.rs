use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtsp_relay::{
    config::Config,
    relay::{RelayRegistry, RelaySettings},
    services::{
        CommandSourceVerifier, FFmpegCommandBuilder, FFmpegFrameCapturer, FFmpegProcessFactory,
        InMemoryStreamStore, SnapshotService,
    },
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "rtsp-relay")]
#[command(version)]
#[command(about = "Relay RTSP cameras to browsers over WebSocket")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (falls back to CONFIG_FILE, then config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// FFmpeg binary (overrides config file)
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("rtsp_relay={},tower_http=trace", cli.log_level)
    } else {
        format!("rtsp_relay={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting RTSP relay v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli
        .config
        .or_else(|| std::env::var("CONFIG_FILE").ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let mut config = Config::load_from_file(&config_path)?;
    info!("Configuration loaded from: {}", config_path);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(ffmpeg) = cli.ffmpeg {
        config.relay.ffmpeg_command = ffmpeg;
    }

    let factory = FFmpegProcessFactory::from_config(&config.relay);
    match factory.detect_version().await {
        Some(version) => info!("Using {}", version),
        None => warn!(
            "'{}' did not run; relays will fail to start until it is installed",
            config.relay.ffmpeg_command
        ),
    }

    let relay_registry = Arc::new(RelayRegistry::new(
        Arc::new(factory),
        RelaySettings::from_config(&config.relay),
    ));

    let stream_store = Arc::new(InMemoryStreamStore::from_seeds(&config.streams));
    info!("Stream store initialized with {} seeded streams", config.streams.len());

    let capturer = FFmpegFrameCapturer::new(
        FFmpegCommandBuilder::from_config(&config.relay),
        &config.snapshot,
    );
    let snapshot_service = Arc::new(SnapshotService::new(
        Arc::new(capturer),
        config.snapshot.clone(),
    ));

    let source_verifier = config
        .relay
        .verify_sources
        .then(|| CommandSourceVerifier::from_config(&config.relay));
    let mut state = AppState::new(
        config,
        relay_registry.clone(),
        stream_store,
        snapshot_service,
    );
    if let Some(verifier) = source_verifier {
        info!("Checking sources with '{}' before saving", state.config.relay.verify_command);
        state = state.with_source_verifier(Arc::new(verifier));
    }
    let web_server = WebServer::new(state)?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    let (ready_tx, _ready_rx) = tokio::sync::oneshot::channel();
    let served = web_server.serve_with_signal(ready_tx).await;

    relay_registry.shutdown_all().await;
    info!("All relays stopped");

    served
}
