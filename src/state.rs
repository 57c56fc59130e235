use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomTable;
use crate::websocket::connection::ConnectionMap;

/// Shared server state passed to every handler and background task.
///
/// All members are cheaply cloneable handles (they wrap `Arc`s internally),
/// so cloning `AppState` per connection is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connections: ConnectionMap,
    pub presence: PresenceRegistry,
    pub rooms: RoomTable,
    pub stats: Arc<RelayStats>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        AppState {
            config,
            connections: ConnectionMap::new(),
            presence: PresenceRegistry::new(),
            rooms: RoomTable::new(),
            stats: Arc::new(RelayStats::default()),
        }
    }
}

/// Process-lifetime relay counters, reported by the periodic stats task.
#[derive(Default)]
pub struct RelayStats {
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
}

impl RelayStats {
    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Account one relayed media message; returns the running message total
    /// so callers can emit throttled checkpoint logs.
    pub fn record_relay(&self, bytes: usize) -> u64 {
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.total_messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
}
