//! Messages exchanged with third-party apps (TPAs).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

use super::dashboard::{DashboardMode, SystemSection};
use super::layout::{DisplayView, Layout};
use super::stream::StreamType;

// ─────────────────────────────────────────────────────────────────────────────
// TPA → cloud
// ─────────────────────────────────────────────────────────────────────────────

/// Messages a TPA sends to the relay.
///
/// Every variant names the package it claims to come from; the router
/// checks that claim against the identity bound at connection time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TpaToCloud {
    /// First frame on a new TPA socket.
    #[serde(rename = "tpa_connection_init", rename_all = "camelCase")]
    ConnectionInit {
        /// Claimed package.
        package_name: String,
        /// Session to attach to.
        session_id: SessionId,
        /// Credential checked by the authenticator.
        api_key: String,
    },
    /// Replace the package's subscription set.
    #[serde(rename_all = "camelCase")]
    SubscriptionUpdate {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// New set of stream types.
        subscriptions: Vec<StreamType>,
    },
    /// Show a layout in the main view.
    #[serde(rename_all = "camelCase")]
    DisplayEvent {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Target view.
        #[serde(default)]
        view: DisplayView,
        /// What to show.
        layout: Layout,
        /// Clear after this many milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// Contribute dashboard content to one or more modes.
    #[serde(rename_all = "camelCase")]
    DashboardContentUpdate {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Content text.
        content: String,
        /// Modes the content targets.
        modes: Vec<DashboardMode>,
    },
    /// Switch the dashboard mode (system app only). `null` hides the dashboard.
    #[serde(rename_all = "camelCase")]
    DashboardModeChange {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// New mode. Must be present; `null` hides the dashboard.
        #[serde(deserialize_with = "required_nullable")]
        mode: Option<DashboardMode>,
    },
    /// Overwrite one system section (system app only).
    #[serde(rename_all = "camelCase")]
    DashboardSystemUpdate {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Which slot.
        section: SystemSection,
        /// New slot text.
        content: String,
    },
    /// Toggle the always-on overlay (system app only).
    #[serde(rename_all = "camelCase")]
    DashboardAlwaysOnChange {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Whether the overlay is shown.
        enabled: bool,
    },
    /// Ask the glasses for a photo.
    #[serde(rename_all = "camelCase")]
    PhotoRequest {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Correlates the eventual upload.
        request_id: String,
        /// Keep a copy on the phone.
        #[serde(default)]
        save_to_gallery: bool,
    },
    /// Ask the glasses for a video stream.
    #[serde(rename_all = "camelCase")]
    VideoStreamRequest {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Correlates the stream.
        request_id: String,
    },
    /// Ask the glasses for one reading of a stream.
    #[serde(rename_all = "camelCase")]
    RequestSingle {
        /// Claimed package.
        package_name: String,
        /// Claimed session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Which stream to sample.
        data_type: StreamType,
    },
}

impl TpaToCloud {
    /// Package the message claims to come from.
    pub fn package_name(&self) -> &str {
        match self {
            Self::ConnectionInit { package_name, .. }
            | Self::SubscriptionUpdate { package_name, .. }
            | Self::DisplayEvent { package_name, .. }
            | Self::DashboardContentUpdate { package_name, .. }
            | Self::DashboardModeChange { package_name, .. }
            | Self::DashboardSystemUpdate { package_name, .. }
            | Self::DashboardAlwaysOnChange { package_name, .. }
            | Self::PhotoRequest { package_name, .. }
            | Self::VideoStreamRequest { package_name, .. }
            | Self::RequestSingle { package_name, .. } => package_name,
        }
    }

    /// Session the message claims to target, if it names one.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::ConnectionInit { session_id, .. } => Some(session_id),
            Self::SubscriptionUpdate { session_id, .. }
            | Self::DisplayEvent { session_id, .. }
            | Self::DashboardContentUpdate { session_id, .. }
            | Self::DashboardModeChange { session_id, .. }
            | Self::DashboardSystemUpdate { session_id, .. }
            | Self::DashboardAlwaysOnChange { session_id, .. }
            | Self::PhotoRequest { session_id, .. }
            | Self::VideoStreamRequest { session_id, .. }
            | Self::RequestSingle { session_id, .. } => session_id.as_ref(),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionInit { .. } => "tpa_connection_init",
            Self::SubscriptionUpdate { .. } => "subscription_update",
            Self::DisplayEvent { .. } => "display_event",
            Self::DashboardContentUpdate { .. } => "dashboard_content_update",
            Self::DashboardModeChange { .. } => "dashboard_mode_change",
            Self::DashboardSystemUpdate { .. } => "dashboard_system_update",
            Self::DashboardAlwaysOnChange { .. } => "dashboard_always_on_change",
            Self::PhotoRequest { .. } => "photo_request",
            Self::VideoStreamRequest { .. } => "video_stream_request",
            Self::RequestSingle { .. } => "request_single",
        }
    }
}

/// Deserialize an `Option` that has to be spelled out. Without a
/// `default`, a field using this errors when absent instead of becoming
/// `None`.
fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

// ─────────────────────────────────────────────────────────────────────────────
// Cloud → TPA
// ─────────────────────────────────────────────────────────────────────────────

/// Why an app was stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The user stopped the app.
    UserDisabled,
    /// The user's session ended.
    SystemStop,
    /// The relay gave up on the app.
    Error,
}

/// Messages the relay sends to a TPA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudToTpa {
    /// The TPA is attached to the session.
    #[serde(rename = "tpa_connection_ack", rename_all = "camelCase")]
    ConnectionAck {
        /// Attached session.
        session_id: SessionId,
        /// Current app settings.
        settings: Value,
    },
    /// The TPA could not be attached.
    #[serde(rename = "tpa_connection_error")]
    ConnectionError {
        /// Machine-readable code.
        code: String,
        /// Human-readable reason.
        message: String,
    },
    /// The app is no longer running for this session.
    AppStopped {
        /// Why.
        reason: StopReason,
    },
    /// The app's settings changed.
    #[serde(rename_all = "camelCase")]
    SettingsUpdate {
        /// Target package.
        package_name: String,
        /// New settings.
        settings: Value,
    },
    /// The dashboard mode changed.
    DashboardModeChanged {
        /// New mode, `null` when hidden.
        mode: Option<DashboardMode>,
    },
    /// The always-on overlay was toggled.
    DashboardAlwaysOnChanged {
        /// Whether the overlay is shown.
        enabled: bool,
    },
    /// A routed stream event.
    #[serde(rename_all = "camelCase")]
    DataStream {
        /// Routing key.
        stream_type: StreamType,
        /// Event payload.
        data: Value,
    },
}
