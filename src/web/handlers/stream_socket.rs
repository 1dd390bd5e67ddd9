//! WebSocket endpoint for live streams (`/ws/stream`)
//!
//! Query parameters: `id` (stored stream id) or `url` (raw RTSP URL), and
//! `video_only`. A video-only socket receives MPEG-TS chunks as binary
//! frames. Any other socket is a control socket: it receives JSON events and
//! sends `{"action": "start" | "stop" | "reconnect"}`.
//!
//! Requests that cannot be served are closed straight after the upgrade
//! with an application close code and never join a relay.

use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
    },
    response::IntoResponse,
};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::RelayConfig,
    models::{RelayEvent, StatusPhase},
    relay::{ControlSink, RelayRegistry, RelaySession, SinkReceiver, VideoSink},
    services::StreamStore,
    utils::UrlUtils,
    web::AppState,
};

/// Missing parameters or a non-RTSP URL
pub const CLOSE_INVALID_REQUEST: u16 = 4000;
/// `id` does not name an active stream
pub const CLOSE_NOT_FOUND: u16 = 4004;

#[derive(Debug, Default, Deserialize)]
pub struct StreamSocketQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub video_only: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Admission {
    Accepted {
        key: String,
        url: String,
        video_only: bool,
    },
    Rejected {
        code: u16,
        reason: &'static str,
    },
}

async fn admit(query: &StreamSocketQuery, store: &dyn StreamStore) -> Admission {
    let video_only = query
        .video_only
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let id = query.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let url = query.url.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let (key, url) = match (id, url) {
        (Some(id), _) => {
            let resolved = match Uuid::parse_str(id) {
                Ok(uuid) => {
                    let key = uuid.to_string();
                    store.resolve(&key).await.map(|url| (key, url))
                }
                Err(_) => None,
            };
            match resolved {
                Some(found) => found,
                None => {
                    return Admission::Rejected {
                        code: CLOSE_NOT_FOUND,
                        reason: "Stream not found",
                    };
                }
            }
        }
        (None, Some(url)) => (url.to_string(), url.to_string()),
        (None, None) => {
            return Admission::Rejected {
                code: CLOSE_INVALID_REQUEST,
                reason: "Missing stream ID or URL",
            };
        }
    };

    if !UrlUtils::is_rtsp_url(&url) {
        return Admission::Rejected {
            code: CLOSE_INVALID_REQUEST,
            reason: "Invalid RTSP URL",
        };
    }

    Admission::Accepted {
        key,
        url,
        video_only,
    }
}

pub async fn stream_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamSocketQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let admission = admit(&query, state.stream_store.as_ref()).await;
    ws.on_upgrade(move |socket| handle_socket(socket, state, admission))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, admission: Admission) {
    match admission {
        Admission::Rejected { code, reason } => {
            debug!(event = "socket_rejected", code, reason, "Closing stream socket");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: Utf8Bytes::from_static(reason),
                })))
                .await;
        }
        Admission::Accepted {
            key,
            url,
            video_only: true,
        } => {
            let (ws_tx, ws_rx) = socket.split();
            run_video_session(ws_tx, ws_rx, &state.relay_registry, &state.config.relay, &key, &url)
                .await;
        }
        Admission::Accepted {
            key,
            url,
            video_only: false,
        } => {
            let (ws_tx, ws_rx) = socket.split();
            run_control_session(ws_tx, ws_rx, &state.relay_registry, &state.config.relay, &key, &url)
                .await;
        }
    }
}

async fn run_video_session<S, R, E>(
    ws_tx: S,
    ws_rx: R,
    registry: &Arc<RelayRegistry>,
    relay_config: &RelayConfig,
    key: &str,
    url: &str,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let (sink, frames) = VideoSink::new(relay_config.sink_queue_capacity);
    let session = registry.attach(key, url, sink.into()).await;
    info!(
        relay_key = %session.display_key(),
        event = "socket_open",
        connection = %session.connection_id(),
        kind = "video",
        source = %UrlUtils::obfuscate_credentials(url),
        "Stream socket opened"
    );

    let exit = tokio::select! {
        exit = pump(ws_tx, frames, relay_config.sink_write_timeout, Message::Binary) => exit,
        () = drain_inbound(ws_rx) => WriterExit::PeerClosed,
    };

    log_exit(&session, exit);
    session.close().await;
    exit
}

async fn run_control_session<S, R, E>(
    ws_tx: S,
    ws_rx: R,
    registry: &Arc<RelayRegistry>,
    relay_config: &RelayConfig,
    key: &str,
    url: &str,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (sink, events) = ControlSink::new(relay_config.control_queue_capacity);
    // Queued first so it precedes anything the attach broadcasts
    sink.notify(RelayEvent::status(StatusPhase::Connected));

    let session = registry.attach(key, url, sink.clone().into()).await;
    info!(
        relay_key = %session.display_key(),
        event = "socket_open",
        connection = %session.connection_id(),
        kind = "control",
        source = %UrlUtils::obfuscate_credentials(url),
        "Stream socket opened"
    );

    let exit = tokio::select! {
        exit = pump(ws_tx, events, relay_config.sink_write_timeout, |event: RelayEvent| {
            Message::Text(event.to_json().into())
        }) => exit,
        () = read_commands(ws_rx, &session, &sink) => WriterExit::PeerClosed,
    };

    log_exit(&session, exit);
    session.close().await;
    exit
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    QueueClosed,
    SocketError,
    Stalled,
    PeerClosed,
}

/// Forward queued items to the socket. A write that errors or exceeds
/// `write_timeout` ends the pump, which detaches the connection.
async fn pump<S, T, F>(
    mut ws_tx: S,
    mut queue: SinkReceiver<T>,
    write_timeout: Duration,
    encode: F,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    F: Fn(T) -> Message,
{
    let exit = loop {
        let Some(item) = queue.recv().await else {
            break WriterExit::QueueClosed;
        };
        match tokio::time::timeout(write_timeout, ws_tx.send(encode(item))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break WriterExit::SocketError,
            Err(_) => break WriterExit::Stalled,
        }
    };

    queue.close();
    if exit == WriterExit::QueueClosed {
        let _ = tokio::time::timeout(write_timeout, ws_tx.send(Message::Close(None))).await;
    }
    exit
}

/// Video sockets ignore inbound data; this only watches for the peer leaving
async fn drain_inbound<R, E>(mut ws_rx: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

async fn read_commands<R, E>(mut ws_rx: R, session: &RelaySession, sink: &ControlSink)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => dispatch_command(session, sink, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(relay_key = %session.display_key(), event = "socket_error", error = %e, "Stream socket read failed");
                break;
            }
        }
    }
}

/// Run one command; failures that escape it become an INTERNAL_ERROR event
async fn dispatch_command(session: &RelaySession, sink: &ControlSink, raw: &str) {
    let Some(relay) = session.relay() else {
        sink.notify(RelayEvent::internal_error());
        return;
    };

    if AssertUnwindSafe(relay.handle_command(sink, raw))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(
            relay_key = %session.display_key(),
            event = "command_panicked",
            connection = %session.connection_id(),
            "Control command panicked"
        );
        sink.notify(RelayEvent::internal_error());
    }
}

fn log_exit(session: &RelaySession, exit: WriterExit) {
    match exit {
        WriterExit::Stalled => warn!(
            relay_key = %session.display_key(),
            event = "sink_stalled",
            connection = %session.connection_id(),
            kind = %session.kind(),
            "Socket write timed out, detaching"
        ),
        WriterExit::SocketError => debug!(
            relay_key = %session.display_key(),
            event = "sink_write_failed",
            connection = %session.connection_id(),
            "Socket write failed, detaching"
        ),
        WriterExit::QueueClosed | WriterExit::PeerClosed => debug!(
            relay_key = %session.display_key(),
            event = "socket_closed",
            connection = %session.connection_id(),
            "Stream socket closed"
        ),
    }
}
