//! Periodic maintenance: the liveness reaper, the empty-room sweep, and the
//! statistics report. All three run for the life of the process.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::presence;
use crate::state::AppState;

pub const LIVENESS_TICK: Duration = Duration::from_secs(5);
pub const ROOM_SWEEP_TICK: Duration = Duration::from_secs(60);
pub const STATS_TICK: Duration = Duration::from_secs(30);

pub fn spawn(state: AppState) {
    tokio::spawn(liveness_reaper(state.clone()));
    tokio::spawn(room_sweeper(state.clone()));
    tokio::spawn(stats_reporter(state));
}

/// Evict users whose heartbeat fell outside the liveness window, close their
/// connections, and publish the shrunken roster once per sweep.
async fn liveness_reaper(state: AppState) {
    let mut tick = interval(LIVENESS_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let expired = state.presence.evict_expired(presence::now_ms()).await;
        if expired.is_empty() {
            continue;
        }
        for (_, conn) in &expired {
            state.connections.close(*conn, "heartbeat timeout").await;
        }
        state.presence.broadcast_roster(&state.connections).await;
    }
}

async fn room_sweeper(state: AppState) {
    let mut tick = interval(ROOM_SWEEP_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let removed = state.rooms.sweep_empty().await;
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "swept empty rooms");
        }
    }
}

async fn stats_reporter(state: AppState) {
    let mut tick = interval(STATS_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let snap = state.stats.snapshot();
        let active_rooms = state.rooms.len().await;
        let online_users = state.presence.user_count().await;
        let live_connections = state.connections.count().await;
        tracing::info!(
            active_rooms,
            online_users,
            live_connections,
            total_connections = snap.total_connections,
            total_messages = snap.total_messages,
            total_mb = snap.total_bytes as f64 / 1024.0 / 1024.0,
            "relay statistics"
        );
        for room in state.rooms.stats_snapshot().await {
            tracing::debug!(
                room_id = %room.id,
                has_publisher = room.has_publisher,
                subscribers = room.subscriber_count,
                messages = room.message_count,
                bytes = room.total_bytes,
                created_at = %room.created_at,
                "room statistics"
            );
        }
    }
}
