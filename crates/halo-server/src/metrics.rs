//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter, labels: role, kind).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge, labels: role).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram, labels: role).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections force-closed by the health monitor (counter, labels: role).
pub const CONNECTIONS_TIMED_OUT_TOTAL: &str = "connections_timed_out_total";
/// Live session actors (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions torn down (counter).
pub const SESSIONS_TORN_DOWN_TOTAL: &str = "sessions_torn_down_total";
/// Backoff windows started (counter, labels: peer).
pub const RECONNECT_WINDOWS_TOTAL: &str = "reconnect_windows_total";
/// Stream deliveries dropped for a dead or full TPA channel (counter).
pub const TPA_DELIVERY_DROPS_TOTAL: &str = "tpa_delivery_drops_total";
/// Inbound messages rejected as malformed or unauthorized (counter, labels: peer).
pub const MESSAGES_REJECTED_TOTAL: &str = "messages_rejected_total";
/// Dashboard layouts sent to the display sink (counter, labels: lane).
pub const DASHBOARD_RENDERS_TOTAL: &str = "dashboard_renders_total";
