use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Valid avatar range accepted from clients. Anything outside is sanitized.
pub const ICON_ID_MIN: i64 = 3;
pub const ICON_ID_MAX: i64 = 21;
/// Sentinel meaning "unknown avatar, use the client default".
pub const ICON_ID_UNKNOWN: i64 = -1;

// ============================================================================
// Inbound frames
// ============================================================================

/// Every text frame on a login connection, parsed once and dispatched on the
/// `type` tag. Unrecognized tags land on `Unknown` and are ignored; login
/// traffic is never fanned out blindly.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoginFrame {
    Login {
        data: LoginData,
    },
    Logout,
    GetOnlineUsers,
    Heartbeat {
        id: Option<String>,
    },
    Ping,
    WatchRequest {
        viewer_id: String,
        target_id: String,
        action: Option<Value>,
    },
    WatchRequestCanceled {
        viewer_id: String,
        target_id: String,
    },
    ApprovalRequired {
        viewer_id: String,
        target_id: String,
    },
    WatchRequestAccepted {
        viewer_id: String,
        target_id: String,
    },
    WatchRequestRejected {
        viewer_id: String,
        target_id: String,
    },
    StreamingOk {
        viewer_id: String,
        target_id: String,
        #[serde(default)]
        stream_url: String,
    },
    KickViewer {
        viewer_id: String,
        target_id: String,
    },
    ViewerMicState {
        viewer_id: String,
        target_id: String,
    },
    #[serde(other)]
    Unknown,
}

/// `login` payload. `viewer_icon_id` is a legacy alias consulted only when
/// `icon_id` is absent.
#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub id: String,
    pub name: String,
    pub icon_id: Option<i64>,
    pub viewer_icon_id: Option<i64>,
}

impl LoginData {
    pub fn requested_icon(&self) -> Option<i64> {
        self.icon_id.or(self.viewer_icon_id)
    }
}

/// Classification of a text frame on a room channel. Only the tag matters:
/// the raw text is forwarded untouched, so payload fields are never modeled
/// here. Unknown tags follow the role's default forwarding rule.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomFrame {
    MousePosition,
    AudioOpus,
    ViewerAudioOpus,
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Roster
// ============================================================================

/// One entry of the online-roster snapshot broadcast to login clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub icon_id: i64,
}

/// Clamp a client-supplied avatar id to the accepted range.
///
/// Out-of-range (or absent) values fall back to whatever the server already
/// recorded for this user, and to the unknown sentinel for first-time logins.
/// The raw out-of-range value never reaches another client.
pub fn sanitize_icon_id(requested: Option<i64>, prior: Option<i64>) -> i64 {
    match requested {
        Some(v) if (ICON_ID_MIN..=ICON_ID_MAX).contains(&v) => v,
        _ => prior.unwrap_or(ICON_ID_UNKNOWN),
    }
}

// ============================================================================
// Outbound message builders
// ============================================================================

pub fn login_response_ok(id: &str, name: &str, icon_id: i64) -> String {
    json!({
        "type": "login_response",
        "success": true,
        "message": "Login successful",
        "data": { "id": id, "name": name, "icon_id": icon_id },
    })
    .to_string()
}

pub fn login_response_err(message: &str) -> String {
    json!({
        "type": "login_response",
        "success": false,
        "message": message,
    })
    .to_string()
}

/// Unicast reply to `get_online_users`. Icon ids are deliberately omitted.
pub fn online_users(roster: &[RosterEntry]) -> String {
    let users: Vec<Value> = roster
        .iter()
        .map(|u| json!({ "id": u.id, "name": u.name }))
        .collect();
    json!({ "type": "online_users", "data": users }).to_string()
}

/// Roster broadcast sent to every login connection after a presence change.
pub fn online_users_update(roster: &[RosterEntry]) -> String {
    json!({ "type": "online_users_update", "data": roster }).to_string()
}

pub fn watch_request_error(message: &str, target_id: &str) -> String {
    json!({
        "type": "watch_request_error",
        "message": message,
        "target_id": target_id,
    })
    .to_string()
}

/// Relay of a viewer's `watch_request` to the target, `action` passed through.
pub fn start_streaming_request(viewer_id: &str, target_id: &str, action: Option<&Value>) -> String {
    let mut msg = json!({
        "type": "start_streaming_request",
        "viewer_id": viewer_id,
        "target_id": target_id,
    });
    if let Some(action) = action {
        msg["action"] = action.clone();
    }
    msg.to_string()
}

pub fn streaming_ok(viewer_id: &str, target_id: &str, stream_url: &str) -> String {
    json!({
        "type": "streaming_ok",
        "viewer_id": viewer_id,
        "target_id": target_id,
        "stream_url": stream_url,
    })
    .to_string()
}

/// Synthetic kick sent to a publisher to make it begin emitting frames.
pub fn start_streaming() -> String {
    json!({ "type": "start_streaming" }).to_string()
}

// ── Unit tests ────────────────────────────────────────────────────────────────
