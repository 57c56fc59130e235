use crate::presence::{self, LoginError};
use crate::protocol::{self, LoginFrame, RoomFrame};
use crate::rooms::Role;
use crate::signaling;
use crate::state::AppState;
use crate::websocket::connection::{ConnId, SendOutcome};

// ============================================================================
// Login channel
// ============================================================================

/// Dispatch one text frame from a login connection. Unparseable frames and
/// unrecognized types are ignored; login traffic is never blind-forwarded.
pub async fn handle_login_text(state: &AppState, conn: ConnId, raw: &str) {
    let Ok(frame) = serde_json::from_str::<LoginFrame>(raw) else {
        return;
    };

    match frame {
        LoginFrame::Login { data } => handle_login(state, conn, data).await,

        LoginFrame::Logout => {
            if let Some(user_id) = state.presence.logout_conn(conn).await {
                tracing::info!(user_id = %user_id, "user logged out");
                state.presence.broadcast_roster(&state.connections).await;
            }
        }

        LoginFrame::GetOnlineUsers => {
            let roster = state.presence.roster().await;
            let _ = state
                .connections
                .send_text(conn, &protocol::online_users(&roster))
                .await;
        }

        LoginFrame::Heartbeat { id } => {
            let user_id = match id.filter(|i| !i.is_empty()) {
                Some(explicit) => Some(explicit),
                None => state.presence.user_for_conn(conn).await,
            };
            if let Some(user_id) = user_id {
                state.presence.touch(&user_id, presence::now_ms()).await;
            }
        }

        LoginFrame::Ping => {
            if let Some(user_id) = state.presence.user_for_conn(conn).await {
                state.presence.touch(&user_id, presence::now_ms()).await;
            }
        }

        LoginFrame::WatchRequest {
            viewer_id,
            target_id,
            action,
        } => signaling::watch_request(state, conn, &viewer_id, &target_id, action.as_ref()).await,

        LoginFrame::WatchRequestCanceled { target_id, .. } => {
            signaling::forward_to_user(state, &target_id, raw).await;
        }

        LoginFrame::ViewerMicState {
            viewer_id,
            target_id,
        } => {
            if viewer_id.is_empty() || target_id.is_empty() {
                return;
            }
            signaling::forward_to_user(state, &target_id, raw).await;
        }

        LoginFrame::ApprovalRequired { viewer_id, .. }
        | LoginFrame::WatchRequestRejected { viewer_id, .. }
        | LoginFrame::KickViewer { viewer_id, .. } => {
            signaling::forward_to_user(state, &viewer_id, raw).await;
        }

        LoginFrame::WatchRequestAccepted {
            viewer_id,
            target_id,
        } => signaling::watch_request_accepted(state, &viewer_id, &target_id, raw).await,

        LoginFrame::StreamingOk {
            viewer_id,
            target_id,
            stream_url,
        } => signaling::streaming_ok(state, &viewer_id, &target_id, &stream_url).await,

        LoginFrame::Unknown => {
            tracing::trace!("ignoring unrecognized login-channel message");
        }
    }
}

async fn handle_login(state: &AppState, conn: ConnId, data: protocol::LoginData) {
    let outcome = state
        .presence
        .login(
            conn,
            &data.id,
            &data.name,
            data.requested_icon(),
            presence::now_ms(),
        )
        .await;

    match outcome {
        Ok(outcome) => {
            if let Some(evicted) = outcome.evicted {
                tracing::info!(user_id = %data.id, "user logged in elsewhere, evicting prior connection");
                state
                    .connections
                    .close(evicted, "replaced by new login")
                    .await;
            }

            tracing::info!(user_id = %data.id, name = %data.name, icon_id = outcome.icon_id, "user logged in");
            let _ = state
                .connections
                .send_text(
                    conn,
                    &protocol::login_response_ok(&data.id, &data.name, outcome.icon_id),
                )
                .await;
            state.presence.broadcast_roster(&state.connections).await;
        }
        Err(err @ LoginError::EmptyIdOrName) => {
            let _ = state
                .connections
                .send_text(conn, &protocol::login_response_err(&err.to_string()))
                .await;
        }
    }
}

// ============================================================================
// Room channels
// ============================================================================

/// Binary frames are media payload and flow strictly downstream: publisher to
/// every subscriber, opaque bytes, exactly one wire message per frame.
pub async fn handle_room_binary(state: &AppState, room_id: &str, role: Role, payload: &[u8]) {
    if role != Role::Publisher {
        tracing::debug!(room_id = %room_id, "dropping binary frame from subscriber");
        return;
    }

    let targets = state.rooms.begin_binary_broadcast(room_id, payload.len()).await;
    let mut sent = 0usize;
    for target in targets {
        match state.connections.send_binary(target, payload).await {
            SendOutcome::Sent => sent += 1,
            SendOutcome::Closed => state.rooms.drop_subscriber(room_id, target).await,
            SendOutcome::Overflow => {
                state.connections.remove(target).await;
                state.rooms.drop_subscriber(room_id, target).await;
            }
        }
    }

    let total = state.stats.record_relay(payload.len());
    if total % 1000 == 0 {
        tracing::debug!(
            room_id = %room_id,
            subscribers_reached = sent,
            total_messages = total,
            "media relay checkpoint"
        );
    }
}

/// Role-aware text routing. The raw text is forwarded untouched; parsing
/// only classifies it. Invalid JSON is dropped so the media hot path stays
/// resilient to garbage.
pub async fn handle_room_text(
    state: &AppState,
    conn: ConnId,
    room_id: &str,
    role: Role,
    raw: &str,
) {
    let Ok(frame) = serde_json::from_str::<RoomFrame>(raw) else {
        return;
    };

    match role {
        Role::Publisher => {
            // Everything a publisher says goes downstream. Audio skips the
            // sender so a publisher subscribed to itself hears no echo.
            let exclude = (frame == RoomFrame::AudioOpus).then_some(conn);
            fanout_text_to_subscribers(state, room_id, exclude, raw).await;
        }
        Role::Subscriber => match frame {
            RoomFrame::ViewerAudioOpus => {
                send_text_to_publisher(state, room_id, raw).await;
                if state.config.viewer_audio_mesh {
                    fanout_text_to_subscribers(state, room_id, Some(conn), raw).await;
                }
            }
            _ => send_text_to_publisher(state, room_id, raw).await,
        },
    }
}

async fn fanout_text_to_subscribers(
    state: &AppState,
    room_id: &str,
    exclude: Option<ConnId>,
    raw: &str,
) {
    let targets = state.rooms.subscriber_targets(room_id, exclude).await;
    for target in targets {
        match state.connections.send_text(target, raw).await {
            SendOutcome::Sent => {}
            SendOutcome::Closed => state.rooms.drop_subscriber(room_id, target).await,
            SendOutcome::Overflow => {
                state.connections.remove(target).await;
                state.rooms.drop_subscriber(room_id, target).await;
            }
        }
    }
}

async fn send_text_to_publisher(state: &AppState, room_id: &str, raw: &str) {
    let Some(publisher) = state.rooms.publisher_of(room_id).await else {
        return;
    };
    match state.connections.send_text(publisher, raw).await {
        SendOutcome::Sent => {}
        SendOutcome::Closed => state.rooms.drop_publisher(room_id, publisher).await,
        SendOutcome::Overflow => {
            state.connections.remove(publisher).await;
            state.rooms.drop_publisher(room_id, publisher).await;
        }
    }
}
