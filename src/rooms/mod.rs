use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::websocket::connection::ConnId;

/// A room connection is either the single publisher or one of many
/// subscribers. The binding is fixed at connect time by the URL path and
/// never changes for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Publisher => "publisher",
            Role::Subscriber => "subscriber",
        }
    }
}

/// One fan-out channel: at most one publisher, any number of subscribers.
///
/// Rooms hold connection handles only; socket teardown happens elsewhere,
/// and a handle left behind by a dead peer is swept lazily during broadcast.
#[derive(Debug)]
pub struct Room {
    id: String,
    publisher: Option<ConnId>,
    subscribers: HashSet<ConnId>,
    created_at: DateTime<Utc>,
    message_count: u64,
    total_bytes: u64,
}

impl Room {
    fn new(id: &str) -> Self {
        Room {
            id: id.to_owned(),
            publisher: None,
            subscribers: HashSet::new(),
            created_at: Utc::now(),
            message_count: 0,
            total_bytes: 0,
        }
    }

    /// Install `conn` as the publisher, displacing any prior one. The prior
    /// publisher is not closed; it merely loses the slot. The new publisher
    /// is removed from the subscriber set so it can never receive its own
    /// stream.
    fn set_publisher(&mut self, conn: ConnId) {
        if self.publisher.is_some_and(|p| p != conn) {
            tracing::info!(room_id = %self.id, "replacing room publisher");
        }
        self.subscribers.remove(&conn);
        self.publisher = Some(conn);
    }

    fn remove_publisher(&mut self) {
        self.publisher = None;
    }

    fn add_subscriber(&mut self, conn: ConnId) {
        if self.publisher == Some(conn) {
            return;
        }
        self.subscribers.insert(conn);
        tracing::info!(
            room_id = %self.id,
            subscriber_count = self.subscribers.len(),
            "subscriber joined room"
        );
    }

    fn remove_subscriber(&mut self, conn: ConnId) {
        if self.subscribers.remove(&conn) {
            tracing::info!(
                room_id = %self.id,
                subscriber_count = self.subscribers.len(),
                "subscriber left room"
            );
        }
    }

    fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.subscribers.is_empty()
    }
}

/// Point-in-time counters for one room, used by the periodic stats report.
#[derive(Debug, Clone)]
pub struct RoomStats {
    pub id: String,
    pub has_publisher: bool,
    pub subscriber_count: usize,
    pub message_count: u64,
    pub total_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// The server's room table. Rooms are created lazily on first join and
/// deleted by the periodic empty-room sweep.
#[derive(Clone, Default)]
pub struct RoomTable {
    inner: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room under its role, creating the room if
    /// needed. Returns the publisher connection that should be nudged with a
    /// `start_streaming` message: the incoming publisher itself when
    /// subscribers are already waiting, or the resident publisher when a new
    /// subscriber arrives.
    pub async fn join(&self, room_id: &str, conn: ConnId, role: Role) -> Option<ConnId> {
        let mut rooms = self.inner.write().await;
        let room = rooms.entry(room_id.to_owned()).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "creating room");
            Room::new(room_id)
        });
        match role {
            Role::Publisher => {
                room.set_publisher(conn);
                (!room.subscribers.is_empty()).then_some(conn)
            }
            Role::Subscriber => {
                room.add_subscriber(conn);
                room.publisher
            }
        }
    }

    /// Remove a departing connection from its room. A displaced publisher's
    /// late disconnect must not clear the slot of its replacement, hence the
    /// identity check.
    pub async fn leave(&self, room_id: &str, conn: ConnId, role: Role) {
        let mut rooms = self.inner.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        match role {
            Role::Publisher => {
                if room.publisher == Some(conn) {
                    room.remove_publisher();
                    tracing::info!(room_id = %room_id, "publisher left room");
                }
            }
            Role::Subscriber => room.remove_subscriber(conn),
        }
    }

    pub async fn publisher_of(&self, room_id: &str) -> Option<ConnId> {
        self.inner.read().await.get(room_id).and_then(|r| r.publisher)
    }

    /// Snapshot the subscriber set for a binary fan-out and account the
    /// message against the room's counters.
    pub async fn begin_binary_broadcast(&self, room_id: &str, payload_len: usize) -> Vec<ConnId> {
        let mut rooms = self.inner.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Vec::new();
        };
        room.message_count += 1;
        room.total_bytes += payload_len as u64;
        room.subscribers.iter().copied().collect()
    }

    /// Snapshot the subscriber set for a text fan-out, optionally excluding
    /// the sender so it never hears its own message.
    pub async fn subscriber_targets(&self, room_id: &str, exclude: Option<ConnId>) -> Vec<ConnId> {
        let rooms = self.inner.read().await;
        let Some(room) = rooms.get(room_id) else {
            return Vec::new();
        };
        room.subscribers
            .iter()
            .copied()
            .filter(|c| Some(*c) != exclude)
            .collect()
    }

    /// Lazy sweep of a subscriber whose socket turned out to be gone.
    pub async fn drop_subscriber(&self, room_id: &str, conn: ConnId) {
        if let Some(room) = self.inner.write().await.get_mut(room_id) {
            room.remove_subscriber(conn);
        }
    }

    /// Clear the publisher slot after a failed send, but only if it still
    /// belongs to the stale connection.
    pub async fn drop_publisher(&self, room_id: &str, conn: ConnId) {
        if let Some(room) = self.inner.write().await.get_mut(room_id) {
            if room.publisher == Some(conn) {
                room.remove_publisher();
            }
        }
    }

    /// Delete every room with neither publisher nor subscribers. Returns the
    /// ids that were removed.
    pub async fn sweep_empty(&self) -> Vec<String> {
        let mut rooms = self.inner.write().await;
        let empty: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| room.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &empty {
            rooms.remove(id);
            tracing::info!(room_id = %id, "reaped empty room");
        }
        empty
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn stats_snapshot(&self) -> Vec<RoomStats> {
        self.inner
            .read()
            .await
            .values()
            .map(|room| RoomStats {
                id: room.id.clone(),
                has_publisher: room.publisher.is_some(),
                subscriber_count: room.subscribers.len(),
                message_count: room.message_count,
                total_bytes: room.total_bytes,
                created_at: room.created_at,
            })
            .collect()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn conn() -> ConnId {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn join_creates_room_lazily() {
        let rooms = RoomTable::new();
        assert!(rooms.is_empty().await);
        rooms.join("u1", conn(), Role::Subscriber).await;
        assert_eq!(rooms.len().await, 1);
    }

    #[tokio::test]
    async fn publisher_join_empty_room_triggers_nothing() {
        let rooms = RoomTable::new();
        let publisher = conn();
        assert_eq!(rooms.join("u1", publisher, Role::Publisher).await, None);
    }

    #[tokio::test]
    async fn publisher_join_with_waiting_subscribers_triggers_self() {
        let rooms = RoomTable::new();
        rooms.join("u1", conn(), Role::Subscriber).await;

        let publisher = conn();
        assert_eq!(
            rooms.join("u1", publisher, Role::Publisher).await,
            Some(publisher)
        );
    }

    #[tokio::test]
    async fn subscriber_join_with_publisher_triggers_publisher() {
        let rooms = RoomTable::new();
        let publisher = conn();
        rooms.join("u1", publisher, Role::Publisher).await;

        assert_eq!(
            rooms.join("u1", conn(), Role::Subscriber).await,
            Some(publisher)
        );
    }

    #[tokio::test]
    async fn publisher_replacement_keeps_subscribers() {
        let rooms = RoomTable::new();
        let old = conn();
        let new = conn();
        let sub = conn();
        rooms.join("u1", old, Role::Publisher).await;
        rooms.join("u1", sub, Role::Subscriber).await;
        rooms.join("u1", new, Role::Publisher).await;

        assert_eq!(rooms.publisher_of("u1").await, Some(new));
        assert_eq!(rooms.subscriber_targets("u1", None).await, vec![sub]);

        // The displaced publisher's eventual disconnect must not clear the
        // slot out from under its replacement.
        rooms.leave("u1", old, Role::Publisher).await;
        assert_eq!(rooms.publisher_of("u1").await, Some(new));

        rooms.leave("u1", new, Role::Publisher).await;
        assert_eq!(rooms.publisher_of("u1").await, None);
    }

    #[tokio::test]
    async fn publisher_never_in_subscriber_set() {
        let rooms = RoomTable::new();
        let both = conn();
        rooms.join("u1", both, Role::Subscriber).await;
        rooms.join("u1", both, Role::Publisher).await;

        assert_eq!(rooms.publisher_of("u1").await, Some(both));
        assert!(rooms.subscriber_targets("u1", None).await.is_empty());
    }

    #[tokio::test]
    async fn subscriber_add_remove_is_idempotent() {
        let rooms = RoomTable::new();
        let sub = conn();
        rooms.join("u1", sub, Role::Subscriber).await;
        rooms.join("u1", sub, Role::Subscriber).await;
        assert_eq!(rooms.subscriber_targets("u1", None).await.len(), 1);

        rooms.leave("u1", sub, Role::Subscriber).await;
        rooms.leave("u1", sub, Role::Subscriber).await;
        assert!(rooms.subscriber_targets("u1", None).await.is_empty());
    }

    #[tokio::test]
    async fn subscriber_targets_can_exclude_sender() {
        let rooms = RoomTable::new();
        let a = conn();
        let b = conn();
        rooms.join("u1", a, Role::Subscriber).await;
        rooms.join("u1", b, Role::Subscriber).await;

        let targets = rooms.subscriber_targets("u1", Some(a)).await;
        assert_eq!(targets, vec![b]);
    }

    #[tokio::test]
    async fn broadcast_accounting_accumulates() {
        let rooms = RoomTable::new();
        let sub = conn();
        rooms.join("u1", sub, Role::Subscriber).await;

        rooms.begin_binary_broadcast("u1", 100).await;
        rooms.begin_binary_broadcast("u1", 50).await;

        let stats = rooms.stats_snapshot().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].message_count, 2);
        assert_eq!(stats[0].total_bytes, 150);
    }

    #[tokio::test]
    async fn sweep_removes_only_empty_rooms() {
        let rooms = RoomTable::new();
        let sub = conn();
        rooms.join("ghost", conn(), Role::Subscriber).await;
        rooms.join("ghost", sub, Role::Subscriber).await;
        rooms.join("busy", conn(), Role::Publisher).await;

        // "ghost" still has a subscriber after one leave, so not yet empty.
        rooms.leave("ghost", sub, Role::Subscriber).await;
        assert!(rooms.sweep_empty().await.is_empty());

        let remaining = rooms.subscriber_targets("ghost", None).await;
        rooms.leave("ghost", remaining[0], Role::Subscriber).await;
        assert_eq!(rooms.sweep_empty().await, vec!["ghost".to_string()]);
        assert_eq!(rooms.len().await, 1);
    }
}
