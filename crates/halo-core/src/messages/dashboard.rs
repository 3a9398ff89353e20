//! Dashboard vocabulary shared by the wire protocol and the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mutually exclusive dashboard views.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardMode {
    /// Compact head-up dashboard.
    Main,
    /// Full-screen dashboard with more room per item.
    Expanded,
    /// Single-line persistent view.
    AlwaysOn,
}

impl DashboardMode {
    /// Every mode, in queue order.
    pub const ALL: [Self; 3] = [Self::Main, Self::Expanded, Self::AlwaysOn];

    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Expanded => "expanded",
            Self::AlwaysOn => "always_on",
        }
    }
}

impl fmt::Display for DashboardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four privileged slots owned by the system app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemSection {
    /// Usually the time and date.
    TopLeft,
    /// Usually battery state.
    TopRight,
    /// Usually notifications.
    BottomLeft,
    /// Usually the status line.
    BottomRight,
}
