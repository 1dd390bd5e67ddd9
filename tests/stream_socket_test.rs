mod common;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use common::{RECV_TIMEOUT, Script, ScriptEnd, ScriptedFactory, StaticCapturer, app_state, eventually};
use rtsp_relay::models::{CreateStreamRequest, ErrorCode, RelayEvent, StatusPhase};
use rtsp_relay::services::StreamStore;
use rtsp_relay::web::{AppState, WebServer};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, WebServer::create_router(state))
            .await
            .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, query: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws/stream?{query}"))
        .await
        .unwrap();
    socket
}

async fn next_message(socket: &mut Socket) -> Message {
    tokio::time::timeout(RECV_TIMEOUT, socket.next())
        .await
        .expect("timed out waiting for message")
        .expect("socket ended")
        .expect("socket error")
}

async fn next_event(socket: &mut Socket) -> RelayEvent {
    match next_message(socket).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text event, got {other:?}"),
    }
}

async fn expect_close(socket: &mut Socket, code: u16, reason: &str) {
    match next_message(socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), code);
            assert_eq!(frame.reason.as_str(), reason);
        }
        other => panic!("expected a close frame, got {other:?}"),
    }
}

async fn stored_stream(state: &AppState, url: &str) -> String {
    state
        .stream_store
        .create(CreateStreamRequest {
            url: url.to_string(),
            label: None,
        })
        .await
        .unwrap()
        .id
        .to_string()
}

#[tokio::test]
async fn rejects_unusable_requests_with_close_codes() {
    let factory = ScriptedFactory::new(Script::default());
    let state = app_state(&factory, StaticCapturer::new());
    let registry = state.relay_registry.clone();
    let addr = spawn_server(state).await;

    let mut socket = connect(addr, "video_only=true").await;
    expect_close(&mut socket, 4000, "Missing stream ID or URL").await;

    let mut socket = connect(addr, &format!("id={}", uuid::Uuid::new_v4())).await;
    expect_close(&mut socket, 4004, "Stream not found").await;

    let mut socket = connect(addr, "url=http://cam.local/live").await;
    expect_close(&mut socket, 4000, "Invalid RTSP URL").await;

    assert!(registry.is_empty().await);
    assert_eq!(factory.stats().created(), 0);
}

#[tokio::test]
async fn control_socket_start_sequence() {
    let factory = ScriptedFactory::new(Script::default());
    let state = app_state(&factory, StaticCapturer::new());
    let id = stored_stream(&state, "rtsp://cam.local/live").await;
    let addr = spawn_server(state).await;

    let mut control = connect(addr, &format!("id={id}")).await;
    assert_eq!(
        next_event(&mut control).await,
        RelayEvent::status(StatusPhase::Connected)
    );

    control
        .send(Message::Text(r#"{"action":"start"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut control).await,
        RelayEvent::status(StatusPhase::Connecting)
    );
    assert_eq!(
        next_event(&mut control).await,
        RelayEvent::status(StatusPhase::Playing)
    );
    assert_eq!(next_event(&mut control).await, RelayEvent::VideoStart);

    control
        .send(Message::Text("{not json".into()))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut control).await,
        RelayEvent::error(ErrorCode::InvalidJson, "Invalid JSON format")
    );

    assert_eq!(factory.stats().created(), 1);
    assert_eq!(factory.stats().urls(), vec!["rtsp://cam.local/live".to_string()]);
}

#[tokio::test]
async fn video_socket_joins_playing_relay() {
    let factory = ScriptedFactory::new(Script {
        chunks: vec![Bytes::from_static(b"ts-a"), Bytes::from_static(b"ts-b")],
        interval: Duration::from_millis(5),
        end: ScriptEnd::Repeat,
        ..Script::default()
    });
    let state = app_state(&factory, StaticCapturer::new());
    let registry = state.relay_registry.clone();
    let id = stored_stream(&state, "rtsp://cam.local/live").await;
    let addr = spawn_server(state).await;

    let mut control = connect(addr, &format!("id={id}")).await;
    next_event(&mut control).await;

    // No command needed: the relay is already playing
    let mut video = connect(addr, &format!("id={id}&video_only=true")).await;
    for _ in 0..4 {
        match next_message(&mut video).await {
            Message::Binary(data) => assert!(data == "ts-a" || data == "ts-b"),
            other => panic!("expected a binary chunk, got {other:?}"),
        }
    }

    assert_eq!(registry.len().await, 1);
    assert_eq!(factory.stats().created(), 1);
    let relay = registry.get(&id).await.unwrap();
    let summary = relay.summary().await;
    assert_eq!((summary.video_sinks, summary.control_sinks), (1, 1));
}

#[tokio::test]
async fn raw_url_sockets_share_a_relay() {
    let factory = ScriptedFactory::new(Script {
        end: ScriptEnd::Repeat,
        ..Script::default()
    });
    let state = app_state(&factory, StaticCapturer::new());
    let registry = state.relay_registry.clone();
    let addr = spawn_server(state).await;

    let query = "url=rtsp://cam.local/raw&video_only=TRUE";
    let mut first = connect(addr, query).await;
    let mut second = connect(addr, query).await;
    assert!(matches!(next_message(&mut first).await, Message::Binary(_)));
    assert!(matches!(next_message(&mut second).await, Message::Binary(_)));

    assert!(registry.get("rtsp://cam.local/raw").await.is_some());
    assert_eq!(factory.stats().created(), 1);
}

#[tokio::test]
async fn closing_every_socket_evicts_the_relay() {
    let factory = ScriptedFactory::new(Script {
        end: ScriptEnd::Repeat,
        ..Script::default()
    });
    let state = app_state(&factory, StaticCapturer::new());
    let registry = state.relay_registry.clone();
    let id = stored_stream(&state, "rtsp://cam.local/live").await;
    let addr = spawn_server(state).await;

    let mut control = connect(addr, &format!("id={id}")).await;
    let mut video = connect(addr, &format!("id={id}&video_only=true")).await;
    next_event(&mut control).await;
    next_message(&mut video).await;
    assert_eq!(factory.stats().alive(), 1);

    control.close(None).await.unwrap();
    video.close(None).await.unwrap();

    let evicted = eventually(|| {
        let registry = registry.clone();
        async move { registry.is_empty().await }
    })
    .await;
    assert!(evicted);
    assert_eq!(factory.stats().alive(), 0);
}
