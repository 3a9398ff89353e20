//! Server configuration.

use halo_settings::HaloSettings;

use crate::session::SessionConfig;
use crate::websocket::monitor::MonitorConfig;

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound channel capacity.
    pub outbound_queue_capacity: usize,
    /// Package allowed to drive the dashboard.
    pub system_app: String,
    /// Health monitor timing.
    pub monitor: MonitorConfig,
    /// Per-session policies.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from(&HaloSettings::default())
        }
    }
}

impl From<&HaloSettings> for ServerConfig {
    fn from(s: &HaloSettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            max_message_size: s.server.max_message_size,
            outbound_queue_capacity: s.server.outbound_queue_capacity,
            system_app: s.apps.system_app_package.clone(),
            monitor: MonitorConfig::from(&s.health),
            session: SessionConfig::from(s),
        }
    }
}
