use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::protocol::{self, RosterEntry};
use crate::websocket::connection::{ConnId, ConnectionMap, SendOutcome};

/// Liveness window: a user whose last heartbeat is older than this is
/// considered offline and gets evicted by the reaper.
pub const HEARTBEAT_WINDOW_MS: i64 = 15_000;

/// Current wall-clock time in epoch milliseconds, the unit heartbeats are
/// recorded in.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("user id and name must not be empty")]
    EmptyIdOrName,
}

/// Outcome of a successful login: the sanitized avatar id, plus the prior
/// connection to evict when the user was already logged in elsewhere.
#[derive(Debug)]
pub struct LoginOutcome {
    pub icon_id: i64,
    pub evicted: Option<ConnId>,
}

#[derive(Debug)]
struct PresenceRecord {
    conn: ConnId,
    name: String,
    icon_id: i64,
    login_time: DateTime<Utc>,
    last_heartbeat_ms: i64,
}

#[derive(Default)]
struct PresenceInner {
    users: HashMap<String, PresenceRecord>,
    /// Every login-channel connection, logged in or not. Roster broadcasts
    /// go to all of them.
    channels: HashSet<ConnId>,
    /// Bumped on every membership change; attached to broadcast logs so
    /// operators can correlate roster versions across clients.
    roster_version: u64,
}

/// Who is online: user-id → (connection, display name, avatar, heartbeats).
///
/// Cheaply cloneable; all clones share the same tables. Compound operations
/// (login-evicts-prior, expiry sweep) complete under a single write lock so
/// no reader observes an intermediate state.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<PresenceInner>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Login channel membership ─────────────────────────────────────────────

    pub async fn attach_channel(&self, conn: ConnId) {
        self.inner.write().await.channels.insert(conn);
    }

    pub async fn detach_channel(&self, conn: ConnId) {
        self.inner.write().await.channels.remove(&conn);
    }

    // ── Presence operations ──────────────────────────────────────────────────

    /// Record a login on `conn`. Rejects empty ids or names. An existing
    /// record for the same user-id is replaced and its connection returned
    /// for eviction; an existing record for the same *connection* under a
    /// different user-id is dropped first, so one connection never carries
    /// two identities.
    pub async fn login(
        &self,
        conn: ConnId,
        user_id: &str,
        name: &str,
        requested_icon: Option<i64>,
        now_ms: i64,
    ) -> Result<LoginOutcome, LoginError> {
        if user_id.is_empty() || name.is_empty() {
            return Err(LoginError::EmptyIdOrName);
        }

        let mut inner = self.inner.write().await;

        let prior_binding: Option<String> = inner
            .users
            .iter()
            .find(|(id, rec)| rec.conn == conn && id.as_str() != user_id)
            .map(|(id, _)| id.clone());
        if let Some(old_id) = prior_binding {
            inner.users.remove(&old_id);
        }

        let prior = inner.users.get(user_id);
        let icon_id = protocol::sanitize_icon_id(requested_icon, prior.map(|r| r.icon_id));
        let evicted = prior.map(|r| r.conn).filter(|c| *c != conn);

        inner.users.insert(
            user_id.to_owned(),
            PresenceRecord {
                conn,
                name: name.to_owned(),
                icon_id,
                login_time: Utc::now(),
                last_heartbeat_ms: now_ms,
            },
        );
        inner.roster_version += 1;

        Ok(LoginOutcome { icon_id, evicted })
    }

    /// Remove whichever user is bound to `conn`, returning its id. Used both
    /// for explicit `logout` messages and for disconnect cleanup; a no-op
    /// when the connection never logged in or was already replaced.
    pub async fn logout_conn(&self, conn: ConnId) -> Option<String> {
        let mut inner = self.inner.write().await;
        let user_id = inner
            .users
            .iter()
            .find(|(_, rec)| rec.conn == conn)
            .map(|(id, _)| id.clone())?;
        inner.users.remove(&user_id);
        inner.roster_version += 1;
        Some(user_id)
    }

    /// Refresh a user's heartbeat. Returns false for unknown users.
    pub async fn touch(&self, user_id: &str, now_ms: i64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(user_id) {
            Some(rec) => {
                rec.last_heartbeat_ms = now_ms;
                true
            }
            None => false,
        }
    }

    pub async fn user_for_conn(&self, conn: ConnId) -> Option<String> {
        self.inner
            .read()
            .await
            .users
            .iter()
            .find(|(_, rec)| rec.conn == conn)
            .map(|(id, _)| id.clone())
    }

    pub async fn find_conn(&self, user_id: &str) -> Option<ConnId> {
        self.inner.read().await.users.get(user_id).map(|r| r.conn)
    }

    /// A user is online when present AND its heartbeat is inside the window.
    pub async fn online(&self, user_id: &str, now_ms: i64) -> bool {
        self.inner
            .read()
            .await
            .users
            .get(user_id)
            .is_some_and(|r| {
                r.last_heartbeat_ms > 0 && now_ms - r.last_heartbeat_ms <= HEARTBEAT_WINDOW_MS
            })
    }

    /// Snapshot of the roster. Order is unspecified.
    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.inner
            .read()
            .await
            .users
            .iter()
            .map(|(id, rec)| RosterEntry {
                id: id.clone(),
                name: rec.name.clone(),
                icon_id: rec.icon_id,
            })
            .collect()
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// Remove every user whose heartbeat expired, returning `(user_id,
    /// connection)` pairs for the caller to close. One sweep, one lock.
    pub async fn evict_expired(&self, now_ms: i64) -> Vec<(String, ConnId)> {
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .users
            .iter()
            .filter(|(_, rec)| {
                rec.last_heartbeat_ms > 0 && now_ms - rec.last_heartbeat_ms > HEARTBEAT_WINDOW_MS
            })
            .map(|(id, _)| id.clone())
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(rec) = inner.users.remove(&id) {
                tracing::info!(
                    user_id = %id,
                    online_since = %rec.login_time,
                    "heartbeat expired, evicting user"
                );
                removed.push((id, rec.conn));
            }
        }
        if !removed.is_empty() {
            inner.roster_version += 1;
        }
        removed
    }

    // ── Roster broadcast ─────────────────────────────────────────────────────

    /// Publish the current roster to every login-channel connection. The
    /// payload is serialized once and reused; connections whose queue is gone
    /// are detached lazily.
    pub async fn broadcast_roster(&self, connections: &ConnectionMap) {
        let (payload, targets, version) = {
            let inner = self.inner.read().await;
            let roster: Vec<RosterEntry> = inner
                .users
                .iter()
                .map(|(id, rec)| RosterEntry {
                    id: id.clone(),
                    name: rec.name.clone(),
                    icon_id: rec.icon_id,
                })
                .collect();
            (
                protocol::online_users_update(&roster),
                inner.channels.iter().copied().collect::<Vec<_>>(),
                inner.roster_version,
            )
        };

        let mut stale = Vec::new();
        for conn in &targets {
            if connections.send_text(*conn, &payload).await == SendOutcome::Closed {
                stale.push(*conn);
            }
        }
        if !stale.is_empty() {
            let mut inner = self.inner.write().await;
            for conn in stale {
                inner.channels.remove(&conn);
            }
        }

        tracing::debug!(
            roster_version = version,
            recipients = targets.len(),
            "broadcast online roster"
        );
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
