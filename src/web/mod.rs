//! Web layer module
//!
//! HTTP and WebSocket interface for the relay. Handlers stay thin and
//! delegate to the relay registry, the stream store and the snapshot service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    routing::{MethodRouter, get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    config::Config,
    relay::RelayRegistry,
    services::{SnapshotService, SourceVerifier, StreamStore},
};

pub mod handlers;
pub mod responses;

pub use responses::{ApiResponse, handle_error};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay_registry: Arc<RelayRegistry>,
    pub stream_store: Arc<dyn StreamStore>,
    pub snapshot_service: Arc<SnapshotService>,
    /// Checks sources before they are saved; unset accepts any `rtsp://` URL
    pub source_verifier: Option<Arc<dyn SourceVerifier>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        relay_registry: Arc<RelayRegistry>,
        stream_store: Arc<dyn StreamStore>,
        snapshot_service: Arc<SnapshotService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            relay_registry,
            stream_store,
            snapshot_service,
            source_verifier: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_source_verifier(mut self, verifier: Arc<dyn SourceVerifier>) -> Self {
        self.source_verifier = Some(verifier);
        self
    }
}

/// Register `path` and its trailing-slash twin on the same handlers
fn route_both(router: Router<AppState>, path: &str, handler: MethodRouter<AppState>) -> Router<AppState> {
    router
        .route(path, handler.clone())
        .route(&format!("{path}/"), handler)
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        Ok(Self {
            app: Self::create_router(state),
            addr,
        })
    }

    pub fn create_router(state: AppState) -> Router {
        let api: [(&str, MethodRouter<AppState>); 7] = [
            ("/api/health", get(handlers::health::health_check)),
            (
                "/api/streams",
                get(handlers::streams::list_streams).post(handlers::streams::create_stream),
            ),
            (
                "/api/streams/{id}",
                get(handlers::streams::get_stream)
                    .put(handlers::streams::replace_stream)
                    .patch(handlers::streams::patch_stream)
                    .delete(handlers::streams::delete_stream),
            ),
            (
                "/api/streams/{id}/thumbnail",
                get(handlers::thumbnails::get_thumbnail),
            ),
            (
                "/api/streams/{id}/thumbnail/refresh",
                post(handlers::thumbnails::refresh_thumbnail),
            ),
            (
                "/api/thumbnails/cache/stats",
                get(handlers::thumbnails::cache_stats),
            ),
            ("/api/relays", get(handlers::relays::list_relays)),
        ];

        api.into_iter()
            .fold(Router::new(), |router, (path, handler)| {
                route_both(router, path, handler)
            })
            .route("/ws/stream", get(handlers::stream_socket::stream_socket))
            // Paths only: query strings may carry source URLs with credentials
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::debug_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path()
                    )
                }),
            )
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve with a notification when the server is actually listening or fails to bind
    pub async fn serve_with_signal(
        self,
        ready_signal: tokio::sync::oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        self.serve_with_cancellation(ready_signal, None).await
    }

    pub async fn serve_with_cancellation(
        self,
        ready_signal: tokio::sync::oneshot::Sender<Result<()>>,
        cancellation_token: Option<CancellationToken>,
    ) -> Result<()> {
        match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => {
                let _ = ready_signal.send(Ok(()));
                info!("Listening on {}", self.addr);

                let shutdown = async move {
                    match cancellation_token {
                        Some(token) => {
                            token.cancelled().await;
                            info!("Web server received cancellation signal, shutting down gracefully");
                        }
                        None => shutdown_signal().await,
                    }
                };

                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown)
                    .await?;
                Ok(())
            }
            Err(bind_error) => {
                let bind_err_msg = format!("Failed to bind to {}: {}", self.addr, bind_error);
                let _ = ready_signal.send(Err(anyhow::anyhow!("{}", bind_err_msg)));
                Err(anyhow::anyhow!("{}", bind_err_msg))
            }
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down gracefully");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
