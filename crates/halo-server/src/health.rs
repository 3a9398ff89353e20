//! `/health` body.

use std::time::Instant;

use serde::Serialize;

use crate::websocket::monitor::MonitorStats;

/// Whether the relay is accepting sockets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Serving.
    Ok,
    /// Shutdown started; new sockets are refused.
    Draining,
}

/// Health check response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Serving or draining.
    pub status: HealthStatus,
    /// Seconds since the server was built.
    pub uptime_secs: u64,
    /// Live session actors.
    pub sessions: usize,
    /// Sockets registered with the health monitor.
    pub connections: usize,
    /// Of which glasses.
    pub glasses_connections: usize,
    /// Of which TPAs.
    pub tpa_connections: usize,
}

impl HealthResponse {
    /// Build a response from the monitor's counts.
    pub fn new(start_time: Instant, stats: MonitorStats, draining: bool) -> Self {
        Self {
            status: if draining {
                HealthStatus::Draining
            } else {
                HealthStatus::Ok
            },
            uptime_secs: start_time.elapsed().as_secs(),
            sessions: stats.active_sessions,
            connections: stats.active_connections,
            glasses_connections: stats.glasses_connections,
            tpa_connections: stats.tpa_connections,
        }
    }

    /// Whether load balancers should keep routing here.
    pub fn is_serving(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}
