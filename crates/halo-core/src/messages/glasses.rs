//! Messages exchanged with a glasses client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::SessionId;

use super::layout::{DisplayView, Layout};
use super::stream::{StreamEvent, StreamType};

// ─────────────────────────────────────────────────────────────────────────────
// Glasses → cloud
// ─────────────────────────────────────────────────────────────────────────────

/// Messages sent by the glasses (via the phone) to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlassesToCloud {
    /// First frame on a new socket; carries the credential for the authenticator.
    #[serde(rename_all = "camelCase")]
    ConnectionInit {
        /// Opaque core token.
        core_token: String,
    },
    /// Hardware button press.
    #[serde(rename_all = "camelCase")]
    ButtonPress {
        /// Which button.
        button_id: String,
        /// `short` or `long`.
        press_type: String,
        /// When the event happened.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Head position change.
    HeadPosition {
        /// `up` or `down`.
        position: String,
        /// When the event happened.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Glasses battery report.
    #[serde(rename_all = "camelCase")]
    GlassesBatteryUpdate {
        /// Charge percentage.
        level: u8,
        /// Whether the glasses are charging.
        charging: bool,
        /// Estimated minutes left.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_remaining: Option<u32>,
        /// When the event happened.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Phone battery report.
    #[serde(rename_all = "camelCase")]
    PhoneBatteryUpdate {
        /// Charge percentage.
        level: u8,
        /// Whether the phone is charging.
        charging: bool,
        /// Estimated minutes left.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_remaining: Option<u32>,
        /// When the event happened.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Link state between phone and glasses.
    #[serde(rename_all = "camelCase")]
    GlassesConnectionState {
        /// Glasses model.
        model_name: String,
        /// `CONNECTED`, `DISCONNECTED`, ...
        status: String,
        /// When the event happened.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Location fix from the phone.
    LocationUpdate {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lng: f64,
        /// When the fix was taken.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Calendar entry mirrored from the phone.
    #[serde(rename_all = "camelCase")]
    CalendarEvent {
        /// Event title.
        title: String,
        /// Calendar-provider id.
        event_id: String,
        /// Start, as sent by the phone.
        dt_start: String,
        /// End, as sent by the phone.
        dt_end: String,
        /// IANA time zone.
        time_zone: String,
        /// When the event was mirrored.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Notification mirrored from the phone.
    #[serde(rename_all = "camelCase")]
    PhoneNotification {
        /// Phone-side notification id.
        notification_id: String,
        /// Originating phone app.
        app: String,
        /// Notification title.
        title: String,
        /// Notification body.
        content: String,
        /// Phone-reported priority.
        #[serde(default)]
        priority: String,
        /// When the notification arrived.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// Voice activity detection.
    #[serde(rename = "VAD")]
    Vad {
        /// Whether speech is currently detected.
        status: bool,
        /// When the state changed.
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
    /// The user started an app from the phone.
    #[serde(rename_all = "camelCase")]
    StartApp {
        /// App package.
        package_name: String,
    },
    /// The user stopped an app from the phone.
    #[serde(rename_all = "camelCase")]
    StopApp {
        /// App package.
        package_name: String,
    },
}

impl GlassesToCloud {
    /// Stream type this message is routed under, if it is a data event.
    pub fn stream_type(&self) -> Option<StreamType> {
        match self {
            Self::ButtonPress { .. } => Some(StreamType::ButtonPress),
            Self::HeadPosition { .. } => Some(StreamType::HeadPosition),
            Self::GlassesBatteryUpdate { .. } => Some(StreamType::GlassesBattery),
            Self::PhoneBatteryUpdate { .. } => Some(StreamType::PhoneBattery),
            Self::GlassesConnectionState { .. } => Some(StreamType::GlassesConnectionState),
            Self::LocationUpdate { .. } => Some(StreamType::Location),
            Self::CalendarEvent { .. } => Some(StreamType::Calendar),
            Self::PhoneNotification { .. } => Some(StreamType::PhoneNotification),
            Self::Vad { .. } => Some(StreamType::Vad),
            Self::ConnectionInit { .. } | Self::StartApp { .. } | Self::StopApp { .. } => None,
        }
    }

    /// Convert a data event into a routable [`StreamEvent`].
    ///
    /// The payload is the message itself, `type` tag included. Control
    /// messages yield `Ok(None)`.
    pub fn to_stream_event(&self) -> Result<Option<StreamEvent>, RelayError> {
        let Some(stream_type) = self.stream_type() else {
            return Ok(None);
        };
        let data = serde_json::to_value(self)?;
        Ok(Some(StreamEvent::new(stream_type, data)))
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionInit { .. } => "connection_init",
            Self::StartApp { .. } => "start_app",
            Self::StopApp { .. } => "stop_app",
            other => other.stream_type().map_or("unknown", StreamType::as_str),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cloud → glasses
// ─────────────────────────────────────────────────────────────────────────────

/// Messages the relay sends to a glasses client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudToGlasses {
    /// The socket is bound to a session.
    #[serde(rename_all = "camelCase")]
    ConnectionAck {
        /// Bound session.
        session_id: SessionId,
        /// Apps currently running for the user.
        active_apps: Vec<String>,
    },
    /// The socket could not be bound.
    ConnectionError {
        /// Human-readable reason.
        message: String,
    },
    /// The core token was rejected.
    AuthError {
        /// Human-readable reason.
        message: String,
    },
    /// Show a layout.
    #[serde(rename_all = "camelCase")]
    DisplayEvent {
        /// Package the layout is attributed to.
        package_name: String,
        /// Target view.
        view: DisplayView,
        /// What to show.
        layout: Layout,
        /// How long to keep it before clearing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// The running app set changed.
    #[serde(rename_all = "camelCase")]
    AppStateChange {
        /// Apps currently running for the user.
        active_apps: Vec<String>,
    },
    /// Turn the microphone on or off.
    #[serde(rename_all = "camelCase")]
    MicrophoneStateChange {
        /// Whether any app needs audio.
        is_microphone_enabled: bool,
    },
    /// An app asked for a photo.
    #[serde(rename_all = "camelCase")]
    PhotoRequest {
        /// Correlates the eventual upload.
        request_id: String,
        /// Requesting app.
        app_id: String,
        /// Keep a copy on the phone.
        save_to_gallery: bool,
    },
    /// An app asked for a video stream.
    #[serde(rename_all = "camelCase")]
    VideoStreamRequest {
        /// Correlates the stream.
        request_id: String,
        /// Requesting app.
        app_id: String,
    },
    /// An app asked for a one-off reading of a stream.
    #[serde(rename_all = "camelCase")]
    RequestSingle {
        /// Which stream to sample.
        data_type: StreamType,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_button_press() {
        let msg: GlassesToCloud = serde_json::from_str(
            r#"{"type":"button_press","buttonId":"main","pressType":"short","timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_matches!(msg, GlassesToCloud::ButtonPress { ref button_id, .. } if button_id == "main");
        assert_eq!(msg.stream_type(), Some(StreamType::ButtonPress));
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let msg: GlassesToCloud =
            serde_json::from_str(r#"{"type":"head_position","position":"up"}"#).unwrap();
        assert_matches!(msg, GlassesToCloud::HeadPosition { .. });
    }

    #[test]
    fn parse_vad_uses_uppercase_tag() {
        let msg: GlassesToCloud = serde_json::from_str(r#"{"type":"VAD","status":true}"#).unwrap();
        assert_matches!(msg, GlassesToCloud::Vad { status: true, .. });
        assert_eq!(msg.kind(), "VAD");
    }

    #[test]
    fn parse_battery_with_optional_field() {
        let msg: GlassesToCloud = serde_json::from_str(
            r#"{"type":"glasses_battery_update","level":80,"charging":false,"timeRemaining":120}"#,
        )
        .unwrap();
        assert_matches!(
            msg,
            GlassesToCloud::GlassesBatteryUpdate { level: 80, time_remaining: Some(120), .. }
        );
    }

    #[test]
    fn control_messages_have_no_stream() {
        let msg: GlassesToCloud =
            serde_json::from_str(r#"{"type":"start_app","packageName":"com.weather"}"#).unwrap();
        assert_eq!(msg.stream_type(), None);
        assert!(msg.to_stream_event().unwrap().is_none());
        assert_eq!(msg.kind(), "start_app");
    }

    #[test]
    fn stream_event_payload_keeps_type_tag() {
        let msg: GlassesToCloud = serde_json::from_str(
            r#"{"type":"location_update","lat":52.5,"lng":13.4}"#,
        )
        .unwrap();
        let event = msg.to_stream_event().unwrap().unwrap();
        assert_eq!(event.stream_type, StreamType::Location);
        assert_eq!(event.data["type"], "location_update");
        assert_eq!(event.data["lat"], 52.5);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<GlassesToCloud>(r#"{"type":"teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn display_event_wire_shape() {
        let msg = CloudToGlasses::DisplayEvent {
            package_name: "system.dashboard".into(),
            view: DisplayView::Dashboard,
            layout: Layout::TextWall { text: "hi".into() },
            duration_ms: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "display_event");
        assert_eq!(json["packageName"], "system.dashboard");
        assert_eq!(json["view"], "dashboard");
        assert_eq!(json["layout"]["layoutType"], "text_wall");
        assert!(json.get("durationMs").is_none());
    }

    #[test]
    fn microphone_state_wire_shape() {
        let json = serde_json::to_value(CloudToGlasses::MicrophoneStateChange {
            is_microphone_enabled: true,
        })
        .unwrap();
        assert_eq!(json["type"], "microphone_state_change");
        assert_eq!(json["isMicrophoneEnabled"], true);
    }
}
