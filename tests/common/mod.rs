// Each integration test file is a separate binary; helpers not used in every
// binary would otherwise trigger dead_code warnings.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::protocol::{frame::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};

use screen_relay_server::{app, config::Config, state::AppState, tasks};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);
/// How long to watch a socket when asserting that nothing arrives.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(300);

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        daemon: false,
        viewer_audio_mesh: true,
    }
}

/// Start a full relay (router + background tasks) on an ephemeral port.
/// Returns the bound address and the shared state for white-box assertions.
pub async fn spawn_server() -> (SocketAddr, AppState) {
    spawn_server_with(test_config()).await
}

pub async fn spawn_server_with(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(Arc::new(config));
    tasks::spawn(state.clone());
    let router = app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("test listener address");
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("test server failed");
    });

    (addr, state)
}

pub async fn connect(addr: SocketAddr, path: &str) -> WsClient {
    let (ws, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("websocket connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("send text frame");
}

pub async fn send_binary(ws: &mut WsClient, payload: Vec<u8>) {
    ws.send(Message::Binary(payload))
        .await
        .expect("send binary frame");
}

/// Next text frame as JSON, skipping any non-text frames.
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is not valid JSON");
        }
    }
}

/// Skip frames until one with the given `type` arrives. Bounded so a missing
/// frame fails the test instead of hanging.
pub async fn recv_type(ws: &mut WsClient, ty: &str) -> Value {
    recv_type_within(ws, ty, RECV_TIMEOUT).await
}

pub async fn recv_type_within(ws: &mut WsClient, ty: &str, window: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("did not receive a '{ty}' frame in time"));
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .unwrap_or_else(|_| panic!("did not receive a '{ty}' frame in time"))
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).expect("frame is not valid JSON");
            if value["type"] == ty {
                return value;
            }
        }
    }
}

pub async fn recv_binary(ws: &mut WsClient) -> Vec<u8> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a binary frame")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        if let Message::Binary(payload) = msg {
            return payload;
        }
    }
}

/// Assert the peer sends no text or binary frame for the given window.
pub async fn assert_silent(ws: &mut WsClient, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) else {
            return;
        };
        match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(Some(Ok(msg))) => panic!("expected silence, got frame: {msg:?}"),
            Ok(Some(Err(e))) => panic!("websocket error while expecting silence: {e}"),
        }
    }
}

/// Wait for the server to close the connection; returns the close frame.
pub async fn expect_close(ws: &mut WsClient, window: Duration) -> Option<CloseFrame<'static>> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("connection was not closed in time");
        match tokio::time::timeout(remaining, ws.next()).await {
            Err(_) => panic!("connection was not closed in time"),
            Ok(None) => return None,
            Ok(Some(Ok(Message::Close(frame)))) => return frame,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => return None,
        }
    }
}

/// Log in on an open login-channel socket and return the `login_response`.
pub async fn login(ws: &mut WsClient, id: &str, name: &str, icon_id: i64) -> Value {
    send_json(
        ws,
        json!({ "type": "login", "data": { "id": id, "name": name, "icon_id": icon_id } }),
    )
    .await;
    recv_type(ws, "login_response").await
}

/// Wait until the server-side join for a room publisher has landed. The
/// client handshake completes before the server task registers the room
/// binding, so tests that rely on the publisher slot must sync on it.
pub async fn wait_for_publisher(state: &AppState, room_id: &str) {
    for _ in 0..100 {
        if state.rooms.publisher_of(room_id).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("publisher never joined room '{room_id}'");
}

/// Wait until the room has at least `count` subscribers.
pub async fn wait_for_subscribers(state: &AppState, room_id: &str, count: usize) {
    for _ in 0..100 {
        if state.rooms.subscriber_targets(room_id, None).await.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room '{room_id}' never reached {count} subscribers");
}

/// The set of user ids in an `online_users_update` payload.
pub fn roster_ids(update: &Value) -> Vec<String> {
    update["data"]
        .as_array()
        .expect("roster data is an array")
        .iter()
        .map(|u| u["id"].as_str().expect("roster id").to_owned())
        .collect()
}
