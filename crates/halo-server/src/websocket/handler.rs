//! Frame parsing and per-socket bookkeeping shared by both gateways.

use std::sync::Arc;

use halo_core::RelayError;
use halo_core::errors::Result;
use halo_core::messages::{GlassesToCloud, TpaToCloud};
use metrics::{counter, gauge, histogram};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::connection::{ClientConnection, Disconnect};
use super::monitor::HealthMonitor;
use crate::metrics::{
    MESSAGES_REJECTED_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Parse a glasses frame.
pub fn parse_glasses(text: &str) -> Result<GlassesToCloud> {
    parse("glasses", text)
}

/// Parse a TPA frame.
pub fn parse_tpa(text: &str) -> Result<TpaToCloud> {
    parse("tpa", text)
}

fn parse<T: DeserializeOwned>(peer: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| RelayError::Protocol(format!("invalid {peer} frame: {e}")))
}

/// Log and count a frame that could not be handled. The socket stays open.
pub(crate) fn reject_frame(connection: &ClientConnection, error: &RelayError) {
    warn!(conn_id = %connection.id, role = %connection.role, error = %error, "frame rejected");
    counter!(MESSAGES_REJECTED_TOTAL, "peer" => connection.role.as_str()).increment(1);
}

/// Tracks one socket from upgrade to close: monitor registration and
/// connection metrics.
pub(crate) struct SocketLifetime {
    connection: Arc<ClientConnection>,
    monitor: Arc<HealthMonitor>,
}

impl SocketLifetime {
    pub(crate) fn open(connection: &Arc<ClientConnection>, monitor: &Arc<HealthMonitor>) -> Self {
        monitor.register(connection.clone());
        let role = connection.role.as_str();
        info!(conn_id = %connection.id, role, "socket opened");
        counter!(WS_CONNECTIONS_TOTAL, "role" => role).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "role" => role).increment(1.0);
        Self {
            connection: connection.clone(),
            monitor: monitor.clone(),
        }
    }

    pub(crate) fn close(self, disconnect: &Disconnect) {
        let _ = self.monitor.unregister(&self.connection.id);
        let role = self.connection.role.as_str();
        info!(
            conn_id = %self.connection.id,
            role,
            kind = disconnect.kind(),
            reason = disconnect.reason(),
            "socket closed"
        );
        counter!(WS_DISCONNECTIONS_TOTAL, "role" => role, "kind" => disconnect.kind()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "role" => role).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS, "role" => role)
            .record(self.connection.age().as_secs_f64());
    }
}
