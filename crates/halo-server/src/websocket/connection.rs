//! WebSocket client connection state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use halo_core::ConnectionId;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// Which kind of peer sits on the other end of a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// A glasses client (via the phone app).
    Glasses,
    /// A third-party app backend.
    Tpa,
}

impl ConnectionRole {
    /// Label value used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Glasses => "glasses",
            Self::Tpa => "tpa",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness as seen by the health monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Liveness {
    /// Activity seen since the last probe.
    Alive = 0,
    /// Probed, no answer yet.
    AwaitingPong = 1,
    /// Force-closed; never becomes alive again.
    Stale = 2,
}

impl Liveness {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Alive,
            1 => Self::AwaitingPong,
            _ => Self::Stale,
        }
    }
}

/// Frame queued for the socket writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(Arc<String>),
    /// Protocol-level liveness probe.
    Ping,
    /// Close handshake; the writer stops after sending it.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Why a socket went away.
///
/// Transient losses open a reconnection window; permanent ones skip it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Network hiccup, timeout, or abnormal close. The peer may come back.
    Transient {
        /// Human-readable cause.
        reason: String,
    },
    /// Normal close, explicit stop, or replacement. The peer is not coming back.
    Permanent {
        /// Human-readable cause.
        reason: String,
    },
}

impl Disconnect {
    /// Transient disconnect with the given reason.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Permanent disconnect with the given reason.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    /// Whether the reconnection window should be skipped.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// Cause of the disconnect.
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason } | Self::Permanent { reason } => reason,
        }
    }

    /// Label value used in metrics.
    pub fn kind(&self) -> &'static str {
        if self.is_permanent() {
            "permanent"
        } else {
            "transient"
        }
    }
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Glasses or TPA.
    pub role: ConnectionRole,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    liveness: AtomicU8,
    /// When the last pong (or any inbound frame) was received.
    last_activity: Mutex<Instant>,
    closed: CancellationToken,
    close_reason: Mutex<Option<Disconnect>>,
    /// Count of messages dropped due to full channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection with a fresh id.
    pub fn new(role: ConnectionRole, tx: mpsc::Sender<Outbound>) -> Self {
        Self::with_id(ConnectionId::new(), role, tx)
    }

    /// Create a connection with a known id.
    pub fn with_id(id: ConnectionId, role: ConnectionRole, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            role,
            tx,
            connected_at: now,
            liveness: AtomicU8::new(Liveness::Alive as u8),
            last_activity: Mutex::new(now),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a serialized text frame. Returns `false` if the channel is full or closed.
    pub fn send(&self, message: Arc<String>) -> bool {
        self.enqueue(Outbound::Text(message))
    }

    /// Serialize and queue a message.
    pub fn send_json<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize outbound message");
                false
            }
        }
    }

    /// Queue a liveness probe.
    pub fn send_ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    /// Queue a close handshake.
    pub fn send_close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.enqueue(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let count = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                if count.is_power_of_two() {
                    warn!(conn_id = %self.id, role = %self.role, dropped = count, "outbound channel full");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Total messages dropped because the channel was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or data frame).
    ///
    /// A stale connection stays stale.
    pub fn record_activity(&self) {
        *self.last_activity.lock() = Instant::now();
        let _ = self.liveness.compare_exchange(
            Liveness::AwaitingPong as u8,
            Liveness::Alive as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Mark a probe as sent. Returns `false` if the connection is stale.
    pub fn mark_probed(&self) -> bool {
        match self.liveness.compare_exchange(
            Liveness::Alive as u8,
            Liveness::AwaitingPong as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => true,
            Err(current) => current != Liveness::Stale as u8,
        }
    }

    /// Current liveness flag.
    pub fn liveness(&self) -> Liveness {
        Liveness::from_u8(self.liveness.load(Ordering::Acquire))
    }

    /// When the last inbound activity was recorded.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the last inbound activity, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// How long this connection has been open.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Close the connection from the server side.
    ///
    /// The first caller's reason wins; returns `false` for later calls.
    pub fn force_close(&self, disconnect: Disconnect) -> bool {
        {
            let mut reason = self.close_reason.lock();
            if reason.is_some() {
                return false;
            }
            *reason = Some(disconnect);
        }
        self.liveness.store(Liveness::Stale as u8, Ordering::Release);
        self.closed.cancel();
        true
    }

    /// Whether the connection has been force-closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is force-closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Reason given to [`force_close`](Self::force_close), if any.
    pub fn close_reason(&self) -> Option<Disconnect> {
        self.close_reason.lock().clone()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("liveness", &self.liveness())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_connection(
    role: ConnectionRole,
    capacity: usize,
) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Arc::new(ClientConnection::new(role, tx)), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn send_queues_text() {
        let (conn, mut rx) = test_connection(ConnectionRole::Tpa, 4);
        assert!(conn.send(Arc::new("hello".into())));
        assert_matches!(rx.try_recv(), Ok(Outbound::Text(t)) if *t == "hello");
    }

    #[test]
    fn send_full_channel_counts_drop() {
        let (conn, _rx) = test_connection(ConnectionRole::Tpa, 1);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_closed_channel_fails_without_drop() {
        let (conn, rx) = test_connection(ConnectionRole::Glasses, 4);
        drop(rx);
        assert!(!conn.send(Arc::new("a".into())));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn send_json_serializes() {
        let (conn, mut rx) = test_connection(ConnectionRole::Glasses, 4);
        assert!(conn.send_json(&serde_json::json!({"type": "x"})));
        assert_matches!(rx.try_recv(), Ok(Outbound::Text(t)) if t.contains("\"type\":\"x\""));
    }

    #[test]
    fn probe_then_activity_restores_alive() {
        let (conn, _rx) = test_connection(ConnectionRole::Glasses, 4);
        assert_eq!(conn.liveness(), Liveness::Alive);
        assert!(conn.mark_probed());
        assert_eq!(conn.liveness(), Liveness::AwaitingPong);
        assert!(conn.mark_probed());
        conn.record_activity();
        assert_eq!(conn.liveness(), Liveness::Alive);
    }

    #[test]
    fn force_close_first_reason_wins() {
        let (conn, _rx) = test_connection(ConnectionRole::Tpa, 4);
        assert!(conn.force_close(Disconnect::transient("heartbeat timeout")));
        assert!(!conn.force_close(Disconnect::permanent("later")));
        assert!(conn.is_closed());
        assert_eq!(conn.liveness(), Liveness::Stale);
        assert_eq!(conn.close_reason(), Some(Disconnect::transient("heartbeat timeout")));
    }

    #[test]
    fn stale_connection_stays_stale() {
        let (conn, _rx) = test_connection(ConnectionRole::Tpa, 4);
        let _ = conn.force_close(Disconnect::permanent("done"));
        conn.record_activity();
        assert_eq!(conn.liveness(), Liveness::Stale);
        assert!(!conn.mark_probed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_for_tracks_last_activity() {
        let (conn, _rx) = test_connection(ConnectionRole::Glasses, 4);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(conn.idle_for(Instant::now()), Duration::from_secs(10));
        conn.record_activity();
        assert_eq!(conn.idle_for(Instant::now()), Duration::ZERO);
    }

    #[tokio::test]
    async fn closed_future_resolves_after_force_close() {
        let (conn, _rx) = test_connection(ConnectionRole::Glasses, 4);
        let waiter = conn.clone();
        let task = tokio::spawn(async move { waiter.closed().await });
        let _ = conn.force_close(Disconnect::permanent("bye"));
        task.await.unwrap();
    }

    #[test]
    fn disconnect_accessors() {
        let d = Disconnect::permanent("normal close");
        assert!(d.is_permanent());
        assert_eq!(d.reason(), "normal close");
        assert_eq!(d.kind(), "permanent");
        assert_eq!(Disconnect::transient("x").kind(), "transient");
    }
}
