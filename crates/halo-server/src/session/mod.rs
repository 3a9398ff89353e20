//! Session lifecycle.
//!
//! One actor per glasses user owns everything about that user's session:
//! the glasses socket, the TPA sockets, the subscription router and the
//! dashboard. Sockets and timers talk to it through a bounded command
//! queue, so all session state is mutated from a single task.

pub mod actor;
pub mod lifecycle;
pub mod registry;
pub mod resources;

use halo_core::backoff::ReconnectPolicy;
use halo_settings::HaloSettings;

use crate::dashboard::DashboardConfig;

pub use actor::{SessionCommand, SessionHandle, SessionSnapshot, TpaSnapshot};
pub use lifecycle::{LinkState, Lifecycle, Transition};
pub use registry::SessionRegistry;

/// Per-session limits and policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Backoff policy for glasses and TPA links.
    pub reconnect: ReconnectPolicy,
    /// Capacity of the actor's command queue.
    pub command_queue_capacity: usize,
    /// Dashboard limits.
    pub dashboard: DashboardConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&HaloSettings::default())
    }
}

impl From<&HaloSettings> for SessionConfig {
    fn from(s: &HaloSettings) -> Self {
        Self {
            reconnect: s.session.reconnect_policy(),
            command_queue_capacity: s.session.command_queue_capacity.max(1),
            dashboard: DashboardConfig::from(&s.dashboard),
        }
    }
}
