//! Connection health monitor.
//!
//! One shared table of open sockets, glasses and TPA alike. Three timers
//! drive it:
//!
//! - **heartbeat**: send a liveness probe to every connection
//! - **sweep**: force-close connections idle longer than the timeout
//! - **stats**: publish connection and session counts
//!
//! Force-closed connections are reported as a transient disconnect, so the
//! session lifecycle opens a reconnection window instead of tearing down.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use halo_core::ConnectionId;
use halo_settings::HealthSettings;
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, ConnectionRole, Disconnect};
use crate::metrics::CONNECTIONS_TIMED_OUT_TOTAL;

/// Reason attached to connections closed by the sweep.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

const EVENT_CAPACITY: usize = 64;

/// Monitor timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Probe period.
    pub heartbeat_interval: Duration,
    /// Idle time after which a connection is closed.
    pub connection_timeout: Duration,
    /// Stats period.
    pub stats_interval: Duration,
    /// Sweep period.
    pub sweep_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&HealthSettings::default())
    }
}

impl From<&HealthSettings> for MonitorConfig {
    fn from(s: &HealthSettings) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            connection_timeout: Duration::from_millis(s.connection_timeout_ms),
            stats_interval: Duration::from_millis(s.stats_interval_ms),
            sweep_interval: Duration::from_millis(s.sweep_interval_ms),
        }
    }
}

/// Point-in-time connection counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Live session actors.
    pub active_sessions: usize,
    /// All registered connections.
    pub active_connections: usize,
    /// Registered glasses connections.
    pub glasses_connections: usize,
    /// Registered TPA connections.
    pub tpa_connections: usize,
}

/// Events published by the monitor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A connection was force-closed for inactivity.
    TimedOut {
        /// Closed connection.
        connection_id: ConnectionId,
        /// Glasses or TPA.
        role: ConnectionRole,
        /// Idle time when it was swept.
        idle: Duration,
    },
    /// Periodic statistics.
    Stats(MonitorStats),
}

/// Tracks liveness of every open socket.
pub struct HealthMonitor {
    config: MonitorConfig,
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    events: broadcast::Sender<MonitorEvent>,
    sessions: Arc<AtomicUsize>,
}

impl HealthMonitor {
    /// Create a monitor. `sessions` is the live session gauge owned by the registry.
    pub fn new(config: MonitorConfig, sessions: Arc<AtomicUsize>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            connections: DashMap::new(),
            events,
            sessions,
        }
    }

    /// Monitor timing.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Subscribe to timeout and stats events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Start tracking a connection.
    pub fn register(&self, connection: Arc<ClientConnection>) {
        debug!(conn_id = %connection.id, role = %connection.role, "connection registered");
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Stop tracking a connection. Returns `true` if it was tracked.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    /// Record inbound activity. Unknown ids are ignored.
    pub fn record_activity(&self, connection_id: &ConnectionId) -> bool {
        match self.connections.get(connection_id) {
            Some(conn) => {
                conn.record_activity();
                true
            }
            None => false,
        }
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Probe every tracked connection. Returns how many probes were queued.
    pub fn send_probes(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.mark_probed() && entry.send_ping())
            .count()
    }

    /// Force-close connections idle for longer than the timeout.
    ///
    /// Victims are collected before any is closed, so closing never
    /// disturbs the iteration.
    pub fn sweep(&self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.config.connection_timeout;
        let victims: Vec<(ConnectionId, Duration)> = self
            .connections
            .iter()
            .filter_map(|entry| {
                let idle = entry.idle_for(now);
                (idle > timeout).then(|| (entry.key().clone(), idle))
            })
            .collect();

        let mut closed = Vec::with_capacity(victims.len());
        for (connection_id, idle) in victims {
            let Some((_, conn)) = self.connections.remove(&connection_id) else {
                continue;
            };
            warn!(
                conn_id = %connection_id,
                role = %conn.role,
                idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                "connection timed out"
            );
            let _ = conn.force_close(Disconnect::transient(HEARTBEAT_TIMEOUT_REASON));
            counter!(CONNECTIONS_TIMED_OUT_TOTAL, "role" => conn.role.as_str()).increment(1);
            let _ = self.events.send(MonitorEvent::TimedOut {
                connection_id: connection_id.clone(),
                role: conn.role,
                idle,
            });
            closed.push(connection_id);
        }
        closed
    }

    /// Current counts.
    pub fn stats(&self) -> MonitorStats {
        let glasses = self
            .connections
            .iter()
            .filter(|entry| entry.role == ConnectionRole::Glasses)
            .count();
        let total = self.connections.len();
        MonitorStats {
            active_sessions: self.sessions.load(Ordering::Relaxed),
            active_connections: total,
            glasses_connections: glasses,
            tpa_connections: total.saturating_sub(glasses),
        }
    }

    /// Log and broadcast the current counts.
    ///
    /// Gauges stay with their owners: socket lifetimes for connections,
    /// the registry for sessions.
    pub fn emit_stats(&self) -> MonitorStats {
        let stats = self.stats();
        info!(
            sessions = stats.active_sessions,
            connections = stats.active_connections,
            glasses = stats.glasses_connections,
            tpas = stats.tpa_connections,
            "connection stats"
        );
        let _ = self.events.send(MonitorEvent::Stats(stats));
        stats
    }

    /// Drive the heartbeat, sweep and stats timers until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut heartbeat = periodic(self.config.heartbeat_interval);
        let mut sweep = periodic(self.config.sweep_interval);
        let mut stats = periodic(self.config.stats_interval);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    let probed = self.send_probes();
                    debug!(probed, "liveness probes sent");
                }
                _ = sweep.tick() => {
                    let _ = self.sweep(Instant::now());
                }
                _ = stats.tick() => {
                    let _ = self.emit_stats();
                }
            }
        }
        debug!("health monitor stopped");
    }
}

/// Interval whose first tick is one period out.
fn periodic(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{Liveness, Outbound, test_connection};
    use assert_matches::assert_matches;

    fn monitor() -> Arc<HealthMonitor> {
        Arc::new(HealthMonitor::new(
            MonitorConfig::default(),
            Arc::new(AtomicUsize::new(0)),
        ))
    }

    #[test]
    fn config_from_settings() {
        let config = MonitorConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.connection_timeout, Duration::from_secs(45));
        assert_eq!(config.stats_interval, Duration::from_secs(60));
    }

    #[test]
    fn register_and_unregister() {
        let monitor = monitor();
        let (conn, _rx) = test_connection(ConnectionRole::Glasses, 4);
        monitor.register(conn.clone());
        assert_eq!(monitor.connection_count(), 1);
        assert!(monitor.unregister(&conn.id));
        assert!(!monitor.unregister(&conn.id));
        assert_eq!(monitor.connection_count(), 0);
    }

    #[test]
    fn record_activity_unknown_is_ignored() {
        let monitor = monitor();
        assert!(!monitor.record_activity(&ConnectionId::from("ghost")));
    }

    #[test]
    fn probes_mark_awaiting_and_queue_ping() {
        let monitor = monitor();
        let (conn, mut rx) = test_connection(ConnectionRole::Tpa, 4);
        monitor.register(conn.clone());
        assert_eq!(monitor.send_probes(), 1);
        assert_eq!(conn.liveness(), Liveness::AwaitingPong);
        assert_matches!(rx.try_recv(), Ok(Outbound::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_closed_active_connection_kept() {
        let monitor = monitor();
        let mut events = monitor.subscribe();
        let (idle, _idle_rx) = test_connection(ConnectionRole::Glasses, 4);
        let (busy, _busy_rx) = test_connection(ConnectionRole::Tpa, 4);
        monitor.register(idle.clone());
        monitor.register(busy.clone());

        time::advance(Duration::from_secs(40)).await;
        assert!(monitor.record_activity(&busy.id));
        time::advance(Duration::from_secs(10)).await;

        let closed = monitor.sweep(Instant::now());
        assert_eq!(closed, vec![idle.id.clone()]);
        assert!(idle.is_closed());
        assert_eq!(idle.close_reason(), Some(Disconnect::transient(HEARTBEAT_TIMEOUT_REASON)));
        assert!(!busy.is_closed());
        assert_eq!(monitor.connection_count(), 1);
        assert_matches!(
            events.try_recv(),
            Ok(MonitorEvent::TimedOut { connection_id, role: ConnectionRole::Glasses, .. })
                if connection_id == idle.id
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_at_exact_timeout_keeps_connection() {
        let monitor = monitor();
        let (conn, _rx) = test_connection(ConnectionRole::Glasses, 4);
        monitor.register(conn.clone());
        time::advance(Duration::from_secs(45)).await;
        assert!(monitor.sweep(Instant::now()).is_empty());
    }

    #[test]
    fn stats_count_roles() {
        let sessions = Arc::new(AtomicUsize::new(3));
        let monitor = HealthMonitor::new(MonitorConfig::default(), sessions);
        let (g, _g_rx) = test_connection(ConnectionRole::Glasses, 4);
        let (t1, _t1_rx) = test_connection(ConnectionRole::Tpa, 4);
        let (t2, _t2_rx) = test_connection(ConnectionRole::Tpa, 4);
        monitor.register(g);
        monitor.register(t1);
        monitor.register(t2);

        let mut events = monitor.subscribe();
        let stats = monitor.emit_stats();
        assert_eq!(
            stats,
            MonitorStats {
                active_sessions: 3,
                active_connections: 3,
                glasses_connections: 1,
                tpa_connections: 2,
            }
        );
        assert_matches!(events.try_recv(), Ok(MonitorEvent::Stats(s)) if s == stats);
    }

    #[test]
    fn emitting_stats_leaves_gauges_untouched() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let monitor = HealthMonitor::new(MonitorConfig::default(), Arc::new(AtomicUsize::new(2)));
        let (g, _g_rx) = test_connection(ConnectionRole::Glasses, 4);
        monitor.register(g);

        let _ = metrics::with_local_recorder(&recorder, || monitor.emit_stats());
        let rendered = handle.render();
        assert!(!rendered.contains("ws_connections_active"));
        assert!(!rendered.contains("sessions_active"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_probes_then_evicts() {
        let monitor = monitor();
        let mut events = monitor.subscribe();
        let (conn, mut rx) = test_connection(ConnectionRole::Glasses, 16);
        monitor.register(conn.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.clone().run(cancel.clone()));

        let first = time::timeout(Duration::from_secs(20), rx.recv()).await.unwrap();
        assert_eq!(first, Some(Outbound::Ping));

        let event = time::timeout(Duration::from_secs(60), async {
            loop {
                if let Ok(MonitorEvent::TimedOut { connection_id, .. }) = events.recv().await {
                    return connection_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, conn.id);
        assert!(conn.is_closed());

        cancel.cancel();
        task.await.unwrap();
    }
}
