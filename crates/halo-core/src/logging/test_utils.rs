//! Thread-local log capture for tests that assert on warnings.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// One recorded event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Level it was logged at.
    pub level: Level,
    /// Module that logged it.
    pub target: String,
    /// The message text.
    pub message: String,
    /// Structured fields, rendered as strings.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// Rendered value of field `key`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Shared buffer the capture layer appends to.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// Copy of everything captured so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.buffer().clone()
    }

    /// Events at `level`.
    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.buffer()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    /// Whether an event at `level` has a message containing `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.buffer()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// Whether any event has field `key` rendered as `value`.
    pub fn has_field(&self, key: &str, value: &str) -> bool {
        self.buffer().iter().any(|e| e.field(key) == Some(value))
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<CapturedEvent>> {
        // a panicking test must not hide what was captured before it
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Recorder {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Recorder {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            let _ = self.fields.insert(field.name().to_owned(), value);
        }
    }
}

impl Visit for Recorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

struct CaptureLayer(CapturedLogs);

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = Recorder::default();
        event.record(&mut recorder);
        let meta = event.metadata();
        self.0.buffer().push(CapturedEvent {
            level: *meta.level(),
            target: meta.target().to_owned(),
            message: recorder.message,
            fields: recorder.fields,
        });
    }
}

/// Capture every event on the current thread while the guard lives.
///
/// `#[tokio::test]` runs on a current-thread runtime, so events from spawned
/// tasks are captured too.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer(logs.clone()))
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_captured_by_level() {
        let (logs, _guard) = capture_logs();
        tracing::info!("socket opened");
        tracing::warn!("frame rejected");
        assert!(logs.has_event(Level::WARN, "frame rejected"));
        assert!(!logs.has_event(Level::WARN, "socket opened"));
        assert_eq!(logs.at_level(Level::WARN).len(), 1);
    }

    #[test]
    fn fields_render_like_the_formatter() {
        let (logs, _guard) = capture_logs();
        let role = "glasses";
        tracing::info!(package_name = "com.weather", attempt = 3, role = %role, "tpa reconnecting");
        let event = &logs.events()[0];
        assert_eq!(event.message, "tpa reconnecting");
        assert_eq!(event.field("package_name"), Some("com.weather"));
        assert_eq!(event.field("attempt"), Some("3"));
        assert!(logs.has_field("role", "glasses"));
    }

    #[test]
    fn capture_is_scoped_to_the_guard() {
        let logs = {
            let (logs, _guard) = capture_logs();
            tracing::warn!("inside");
            logs
        };
        tracing::warn!("outside");
        assert_eq!(logs.events().len(), 1);
    }
}
