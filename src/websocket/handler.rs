use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RejectReason;
use crate::protocol;
use crate::rooms::Role;
use crate::state::AppState;
use crate::websocket::connection::OutboundFrame;
use crate::websocket::router;

// ============================================================================
// Upgrade handlers
// ============================================================================

/// GET `/` or `/login`: the control channel for presence, roster and the
/// watch-request handshake.
pub async fn login_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_login_socket(socket, peer, state))
}

/// GET `/publish/{room_id}`: the room's single media source.
pub async fn publish_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_room_socket(socket, peer, room_id, Role::Publisher, state))
}

/// GET `/subscribe/{room_id}`: a media sink for the room.
pub async fn subscribe_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_room_socket(socket, peer, room_id, Role::Subscriber, state))
}

/// Anything that matched no route. WebSocket upgrades are accepted and then
/// closed normally with a short reason string so clients can tell a typo from
/// a network failure; plain HTTP requests get a 404.
pub async fn reject_unknown_path(uri: Uri, ws: Option<WebSocketUpgrade>) -> Response {
    let reason = RejectReason::classify(uri.path());
    tracing::info!(path = %uri.path(), reason = reason.as_str(), "rejecting unrecognized path");
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| close_with_reason(socket, reason)),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn close_with_reason(mut socket: WebSocket, reason: RejectReason) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: reason.as_str().into(),
        })))
        .await;
}

// ============================================================================
// Connection lifecycle
// ============================================================================

/// Forward queued outbound frames to the socket. This task is the only
/// writer for its connection, which is what keeps concurrent producers from
/// interleaving frames to one peer.
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text),
                OutboundFrame::Binary(payload) => Message::Binary(payload),
                OutboundFrame::Close(reason) => {
                    let _ = sink
                        .send(Message::Close(reason.map(|r| CloseFrame {
                            code: close_code::NORMAL,
                            reason: r.into(),
                        })))
                        .await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    })
}

async fn run_login_socket(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (conn_id, rx) = state.connections.register(peer).await;
    state.stats.record_connection();
    state.presence.attach_channel(conn_id).await;
    tracing::info!(%peer, conn_id = %conn_id, "login client connected");

    let mut send_task = spawn_writer(sink, rx);

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    router::handle_login_text(&recv_state, conn_id, &text).await;
                }
                Ok(Message::Close(_)) => break,
                // Binary has no meaning on the control channel.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = ?e, "login socket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.presence.detach_channel(conn_id).await;
    if let Some(user_id) = state.presence.logout_conn(conn_id).await {
        tracing::info!(%peer, user_id = %user_id, "login client disconnected, user logged out");
        state.presence.broadcast_roster(&state.connections).await;
    } else {
        tracing::info!(%peer, "login client disconnected");
    }
    state.connections.remove(conn_id).await;
}

async fn run_room_socket(
    socket: WebSocket,
    peer: SocketAddr,
    room_id: String,
    role: Role,
    state: AppState,
) {
    let (sink, mut stream) = socket.split();
    let (conn_id, rx) = state.connections.register(peer).await;
    state.stats.record_connection();
    tracing::info!(%peer, room_id = %room_id, role = role.as_str(), "room client connected");

    let mut send_task = spawn_writer(sink, rx);

    // A publisher facing waiting subscribers, or the resident publisher when
    // a subscriber arrives, gets told to start emitting frames right away.
    if let Some(publisher) = state.rooms.join(&room_id, conn_id, role).await {
        let _ = state
            .connections
            .send_text(publisher, &protocol::start_streaming())
            .await;
        tracing::info!(room_id = %room_id, "auto-triggered publisher streaming start");
    }

    let recv_state = state.clone();
    let recv_room = room_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    router::handle_room_text(&recv_state, conn_id, &recv_room, role, &text).await;
                }
                Ok(Message::Binary(payload)) => {
                    router::handle_room_binary(&recv_state, &recv_room, role, &payload).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = ?e, "room socket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.rooms.leave(&room_id, conn_id, role).await;
    state.connections.remove(conn_id).await;
    tracing::info!(%peer, room_id = %room_id, role = role.as_str(), "room client disconnected");
}
