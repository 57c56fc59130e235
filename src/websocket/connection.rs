use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Stable opaque handle for one live WebSocket session. All server tables
/// refer to connections by this id, never by socket reference.
pub type ConnId = Uuid;

/// Per-connection outbound queue bound, in frames.
///
/// A peer that falls this far behind is disconnected rather than allowed to
/// buffer without limit; other peers in the same room are unaffected.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// A frame queued for the connection's dedicated writer task. `Close` is
/// terminal: the writer emits the close frame and stops draining the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<String>),
}

/// Result of enqueueing a frame for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The peer is gone (or was never registered); the frame was dropped.
    Closed,
    /// The peer's outbound queue is full; the caller should disconnect it.
    Overflow,
}

impl SendOutcome {
    pub fn is_sent(self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

struct ConnectionHandle {
    tx: mpsc::Sender<OutboundFrame>,
    peer: SocketAddr,
}

/// Tracks every live connection's outbound queue, keyed by [`ConnId`].
///
/// Cheaply cloneable; all clones share the same underlying map via `Arc`.
/// Writes to one peer are serialized by construction: only that peer's writer
/// task dequeues frames, so two logical producers can never interleave bytes
/// inside one frame sequence.
#[derive(Clone, Default)]
pub struct ConnectionMap {
    inner: Arc<RwLock<HashMap<ConnId, ConnectionHandle>>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection. Returns its handle and the
    /// receiving half of its outbound queue, to be drained by a writer task.
    pub async fn register(&self, peer: SocketAddr) -> (ConnId, mpsc::Receiver<OutboundFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.inner
            .write()
            .await
            .insert(id, ConnectionHandle { tx, peer });
        (id, rx)
    }

    /// Drop a connection's queue. The writer task observes the closed channel
    /// and shuts the socket down; callers use this both for normal teardown
    /// and to force-disconnect an overflowing peer.
    pub async fn remove(&self, id: ConnId) {
        self.inner.write().await.remove(&id);
    }

    /// Enqueue a text frame. Sends to unknown or departed peers are silent
    /// no-ops; a failed relay is always non-fatal.
    pub async fn send_text(&self, id: ConnId, text: &str) -> SendOutcome {
        self.enqueue(id, OutboundFrame::Text(text.to_owned())).await
    }

    /// Enqueue a binary frame. One call corresponds to exactly one WebSocket
    /// binary message on the wire.
    pub async fn send_binary(&self, id: ConnId, payload: &[u8]) -> SendOutcome {
        self.enqueue(id, OutboundFrame::Binary(payload.to_vec()))
            .await
    }

    /// Request a graceful close with the given reason. If the queue is
    /// already full the entry is dropped outright; the socket still closes,
    /// just without the reason frame.
    pub async fn close(&self, id: ConnId, reason: &str) {
        let outcome = self
            .enqueue(id, OutboundFrame::Close(Some(reason.to_owned())))
            .await;
        if outcome == SendOutcome::Overflow {
            self.remove(id).await;
        }
    }

    /// Peer address captured at accept time. Diagnostic only.
    pub async fn peer(&self, id: ConnId) -> Option<SocketAddr> {
        self.inner.read().await.get(&id).map(|h| h.peer)
    }

    pub async fn is_connected(&self, id: ConnId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    async fn enqueue(&self, id: ConnId, frame: OutboundFrame) -> SendOutcome {
        let conns = self.inner.read().await;
        let Some(handle) = conns.get(&id) else {
            return SendOutcome::Closed;
        };
        match handle.tx.try_send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %id,
                    peer = %handle.peer,
                    capacity = OUTBOUND_QUEUE_CAPACITY,
                    "outbound queue overflow, peer will be disconnected"
                );
                SendOutcome::Overflow
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
