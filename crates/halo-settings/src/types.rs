//! Settings types.
//!
//! Every struct is `#[serde(default)]`, so a settings file only needs the
//! keys it wants to change. Keys are camelCase.

use halo_core::backoff::ReconnectPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the relay.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HaloSettings {
    /// Network settings.
    pub server: ServerSettings,
    /// Connection health monitor settings.
    pub health: HealthSettings,
    /// Session lifecycle settings.
    pub session: SessionSettings,
    /// Dashboard settings.
    pub dashboard: DashboardSettings,
    /// App directory settings.
    pub apps: AppsSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Largest accepted WebSocket frame in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound channel capacity.
    pub outbound_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
            max_message_size: 1024 * 1024,
            outbound_queue_capacity: 256,
        }
    }
}

/// Connection health monitor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    /// How often liveness probes are sent.
    pub heartbeat_interval_ms: u64,
    /// Idle time after which a connection is force-closed.
    pub connection_timeout_ms: u64,
    /// How often connection statistics are emitted.
    pub stats_interval_ms: u64,
    /// How often idle connections are swept.
    pub sweep_interval_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            connection_timeout_ms: 45_000,
            stats_interval_ms: 60_000,
            sweep_interval_ms: 5_000,
        }
    }
}

/// Session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Backoff windows before a peer is declared gone.
    pub max_reconnect_attempts: u32,
    /// First backoff window.
    pub reconnect_base_delay_ms: u64,
    /// Largest backoff window.
    pub reconnect_max_delay_ms: u64,
    /// Capacity of each session actor's command queue.
    pub command_queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_reconnect_attempts: policy.max_attempts,
            reconnect_base_delay_ms: policy.base_delay_ms,
            reconnect_max_delay_ms: policy.max_delay_ms,
            command_queue_capacity: 1024,
        }
    }
}

impl SessionSettings {
    /// Reconnect policy built from these settings.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.reconnect_base_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
        }
    }
}

/// Dashboard settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSettings {
    /// Minimum time between two layouts on the same lane.
    pub update_throttle_ms: u64,
    /// Items kept per mode queue.
    pub queue_size: usize,
    /// Largest accepted content contribution in bytes.
    pub max_content_bytes: usize,
    /// Phone notifications remembered for de-duplication.
    pub notification_cache_size: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            update_throttle_ms: 500,
            queue_size: 5,
            max_content_bytes: 1024,
            notification_cache_size: 10,
        }
    }
}

/// App directory settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppsSettings {
    /// Package allowed to drive the dashboard.
    pub system_app_package: String,
}

impl Default for AppsSettings {
    fn default() -> Self {
        Self {
            system_app_package: "system.dashboard".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl HaloSettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

        if self.health.heartbeat_interval_ms == 0
            || self.health.sweep_interval_ms == 0
            || self.health.stats_interval_ms == 0
        {
            return invalid("health intervals must be non-zero");
        }
        if self.health.connection_timeout_ms <= self.health.heartbeat_interval_ms {
            return invalid("connectionTimeoutMs must exceed heartbeatIntervalMs");
        }
        if self.session.reconnect_base_delay_ms > self.session.reconnect_max_delay_ms {
            return invalid("reconnectBaseDelayMs must not exceed reconnectMaxDelayMs");
        }
        if self.session.command_queue_capacity == 0 || self.server.outbound_queue_capacity == 0 {
            return invalid("queue capacities must be at least 1");
        }
        if self.dashboard.queue_size == 0 {
            return invalid("dashboard queueSize must be at least 1");
        }
        if self.dashboard.max_content_bytes == 0 || self.dashboard.notification_cache_size == 0 {
            return invalid("dashboard limits must be at least 1");
        }
        if self.apps.system_app_package.trim().is_empty() {
            return invalid("systemAppPackage must not be empty");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = HaloSettings::default();
        assert_eq!(s.health.heartbeat_interval_ms, 15_000);
        assert_eq!(s.health.connection_timeout_ms, 45_000);
        assert_eq!(s.health.stats_interval_ms, 60_000);
        assert_eq!(s.dashboard.queue_size, 5);
        assert_eq!(s.session.max_reconnect_attempts, 5);
        assert_eq!(s.apps.system_app_package, "system.dashboard");
    }

    #[test]
    fn defaults_are_valid() {
        assert!(HaloSettings::default().validate().is_ok());
    }

    #[test]
    fn timeout_must_exceed_heartbeat() {
        let mut s = HaloSettings::default();
        s.health.connection_timeout_ms = s.health.heartbeat_interval_ms;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("connectionTimeoutMs"));
    }

    #[test]
    fn zero_queue_size_rejected() {
        let mut s = HaloSettings::default();
        s.dashboard.queue_size = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn blank_system_app_rejected() {
        let mut s = HaloSettings::default();
        s.apps.system_app_package = "  ".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn inverted_backoff_bounds_rejected() {
        let mut s = HaloSettings::default();
        s.session.reconnect_base_delay_ms = 60_000;
        s.session.reconnect_max_delay_ms = 1_000;
        assert!(s.validate().is_err());
    }

    #[test]
    fn reconnect_policy_from_settings() {
        let mut s = SessionSettings::default();
        s.max_reconnect_attempts = 2;
        let policy = s.reconnect_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay_ms, 1000);
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_value(HaloSettings::default()).unwrap();
        assert_eq!(json["health"]["heartbeatIntervalMs"], 15_000);
        assert_eq!(json["apps"]["systemAppPackage"], "system.dashboard");
    }
}
