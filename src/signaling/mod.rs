//! The watch-request handshake: viewers ask to watch a target, the target
//! approves or rejects, and the server nudges the target's publisher into
//! actually emitting frames. All of it rides on login connections; the
//! server's job is lookup-and-relay, with state implicit in the messages.

use serde_json::Value;

use crate::presence;
use crate::protocol;
use crate::state::AppState;
use crate::websocket::connection::ConnId;

/// A viewer asked to watch `target_id`. The target must be online (present
/// and inside the heartbeat window) and reachable; otherwise the requester
/// gets a targeted `watch_request_error` and nothing else moves.
pub async fn watch_request(
    state: &AppState,
    requester: ConnId,
    viewer_id: &str,
    target_id: &str,
    action: Option<&Value>,
) {
    let now = presence::now_ms();
    let target_conn = if state.presence.online(target_id, now).await {
        state.presence.find_conn(target_id).await
    } else {
        None
    };

    let delivered = match target_conn {
        Some(conn) => state
            .connections
            .send_text(
                conn,
                &protocol::start_streaming_request(viewer_id, target_id, action),
            )
            .await
            .is_sent(),
        None => false,
    };

    if delivered {
        tracing::info!(viewer_id = %viewer_id, target_id = %target_id, "relayed watch request");
    } else {
        tracing::info!(viewer_id = %viewer_id, target_id = %target_id, "watch request target unavailable");
        let _ = state
            .connections
            .send_text(
                requester,
                &protocol::watch_request_error("Target user is not online", target_id),
            )
            .await;
    }
}

/// Relay a signaling message verbatim to a named user's login connection.
/// Missing or departed peers are a silent drop; the handshake has no
/// retries.
pub async fn forward_to_user(state: &AppState, user_id: &str, raw: &str) {
    let Some(conn) = state.presence.find_conn(user_id).await else {
        tracing::debug!(user_id = %user_id, "signaling peer not logged in, dropping message");
        return;
    };
    let _ = state.connections.send_text(conn, raw).await;
}

/// The target accepted: the viewer learns of the approval, and the target's
/// own publisher connection gets the same message so capture starts. A
/// repeat accept re-nudges the publisher, which is harmless.
pub async fn watch_request_accepted(
    state: &AppState,
    viewer_id: &str,
    target_id: &str,
    raw: &str,
) {
    forward_to_user(state, viewer_id, raw).await;

    if let Some(publisher) = state.rooms.publisher_of(target_id).await {
        let _ = state.connections.send_text(publisher, raw).await;
        tracing::info!(target_id = %target_id, "nudged publisher after watch request accept");
    }
}

/// The target's stream is up: tell the viewer where to subscribe, then tell
/// the room's publisher to start emitting frames.
pub async fn streaming_ok(state: &AppState, viewer_id: &str, target_id: &str, stream_url: &str) {
    let Some(viewer_conn) = state.presence.find_conn(viewer_id).await else {
        tracing::debug!(viewer_id = %viewer_id, "streaming_ok viewer not logged in");
        trigger_publisher(state, target_id).await;
        return;
    };
    let _ = state
        .connections
        .send_text(
            viewer_conn,
            &protocol::streaming_ok(viewer_id, target_id, stream_url),
        )
        .await;

    trigger_publisher(state, target_id).await;
}

async fn trigger_publisher(state: &AppState, room_id: &str) {
    match state.rooms.publisher_of(room_id).await {
        Some(publisher) => {
            let _ = state
                .connections
                .send_text(publisher, &protocol::start_streaming())
                .await;
            tracing::info!(room_id = %room_id, "sent start_streaming to publisher");
        }
        None => {
            tracing::debug!(room_id = %room_id, "no publisher to trigger in room");
        }
    }
}
