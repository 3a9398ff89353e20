//! Stream types and routed stream events.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed category of event a TPA can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamType {
    /// Speech-to-text results (system-originated).
    #[serde(rename = "transcription")]
    Transcription,
    /// Translated speech (system-originated).
    #[serde(rename = "translation")]
    Translation,
    /// Phone location fixes.
    #[serde(rename = "location_update")]
    Location,
    /// Glasses battery level.
    #[serde(rename = "glasses_battery_update")]
    GlassesBattery,
    /// Phone battery level.
    #[serde(rename = "phone_battery_update")]
    PhoneBattery,
    /// Notifications mirrored from the phone.
    #[serde(rename = "phone_notification")]
    PhoneNotification,
    /// Calendar events from the phone.
    #[serde(rename = "calendar_event")]
    Calendar,
    /// Hardware button presses.
    #[serde(rename = "button_press")]
    ButtonPress,
    /// Head up / head down.
    #[serde(rename = "head_position")]
    HeadPosition,
    /// Glasses model and link status.
    #[serde(rename = "glasses_connection_state")]
    GlassesConnectionState,
    /// Voice activity detection.
    #[serde(rename = "VAD")]
    Vad,
    /// Dashboard mode changes made by the system app.
    #[serde(rename = "dashboard_mode_change")]
    DashboardModeChange,
    /// Always-on overlay toggles made by the system app.
    #[serde(rename = "dashboard_always_on_change")]
    DashboardAlwaysOnChange,
}

impl StreamType {
    /// Wire name of the stream type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Translation => "translation",
            Self::Location => "location_update",
            Self::GlassesBattery => "glasses_battery_update",
            Self::PhoneBattery => "phone_battery_update",
            Self::PhoneNotification => "phone_notification",
            Self::Calendar => "calendar_event",
            Self::ButtonPress => "button_press",
            Self::HeadPosition => "head_position",
            Self::GlassesConnectionState => "glasses_connection_state",
            Self::Vad => "VAD",
            Self::DashboardModeChange => "dashboard_mode_change",
            Self::DashboardAlwaysOnChange => "dashboard_always_on_change",
        }
    }

    /// Whether a subscriber to this stream needs the glasses microphone on.
    pub fn needs_microphone(self) -> bool {
        matches!(self, Self::Transcription | Self::Translation | Self::Vad)
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event tagged with its stream type, ready for routing.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    /// Routing key.
    pub stream_type: StreamType,
    /// Kind-specific payload, forwarded to subscribers verbatim.
    pub data: Value,
}

impl StreamEvent {
    /// Create a stream event.
    pub fn new(stream_type: StreamType, data: Value) -> Self {
        Self { stream_type, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_as_str() {
        let all = [
            StreamType::Transcription,
            StreamType::Translation,
            StreamType::Location,
            StreamType::GlassesBattery,
            StreamType::PhoneBattery,
            StreamType::PhoneNotification,
            StreamType::Calendar,
            StreamType::ButtonPress,
            StreamType::HeadPosition,
            StreamType::GlassesConnectionState,
            StreamType::Vad,
            StreamType::DashboardModeChange,
            StreamType::DashboardAlwaysOnChange,
        ];
        for st in all {
            let json = serde_json::to_string(&st).unwrap();
            assert_eq!(json, format!("\"{}\"", st.as_str()));
        }
    }

    #[test]
    fn unknown_stream_type_is_rejected() {
        assert!(serde_json::from_str::<StreamType>("\"telepathy\"").is_err());
    }

    #[test]
    fn audio_streams_need_microphone() {
        assert!(StreamType::Transcription.needs_microphone());
        assert!(StreamType::Vad.needs_microphone());
        assert!(!StreamType::ButtonPress.needs_microphone());
    }
}
