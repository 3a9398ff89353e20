//! Display sink: where composed layouts go.
//!
//! The dashboard and TPA display requests only see [`DisplaySink`]. The
//! glasses implementation forwards to whichever glasses socket is current,
//! so a reconnect swaps the socket without touching the producers.

use std::sync::Arc;
use std::time::Duration;

use halo_core::ConnectionId;
use halo_core::messages::{CloudToGlasses, DisplayView, Layout};
use parking_lot::RwLock;
use tracing::debug;

use crate::websocket::connection::ClientConnection;

/// How a layout should be shown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Target view.
    pub view: DisplayView,
    /// Clear after this long.
    pub duration: Option<Duration>,
}

impl DisplayOptions {
    /// Options targeting `view` with no expiry.
    pub fn view(view: DisplayView) -> Self {
        Self {
            view,
            duration: None,
        }
    }
}

/// Renders layouts for one user.
pub trait DisplaySink: Send + Sync {
    /// Show `layout` on behalf of `package_name`. Returns `false` if it could not be queued.
    fn show(&self, package_name: &str, layout: &Layout, options: &DisplayOptions) -> bool;
}

/// Display sink over the session's current glasses socket.
#[derive(Default)]
pub struct GlassesLink {
    current: RwLock<Option<Arc<ClientConnection>>>,
}

impl GlassesLink {
    /// Link with no socket attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a socket, returning the one it replaces.
    pub fn attach(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        self.current.write().replace(connection)
    }

    /// Detach `connection_id` if it is the current socket.
    pub fn detach(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|c| &c.id == connection_id) {
            current.take()
        } else {
            None
        }
    }

    /// Detach whatever socket is current.
    pub fn take(&self) -> Option<Arc<ClientConnection>> {
        self.current.write().take()
    }

    /// Id of the current socket.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.current.read().as_ref().map(|c| c.id.clone())
    }

    /// Whether a socket is attached.
    pub fn is_connected(&self) -> bool {
        self.current.read().is_some()
    }

    /// Send any glasses-bound message. Returns `false` if no socket is attached.
    pub fn send(&self, message: &CloudToGlasses) -> bool {
        match self.current.read().as_ref() {
            Some(conn) => conn.send_json(message),
            None => {
                debug!("no glasses connection; message dropped");
                false
            }
        }
    }
}

impl DisplaySink for GlassesLink {
    fn show(&self, package_name: &str, layout: &Layout, options: &DisplayOptions) -> bool {
        self.send(&CloudToGlasses::DisplayEvent {
            package_name: package_name.to_owned(),
            view: options.view,
            layout: layout.clone(),
            duration_ms: options
                .duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that records every layout it is handed.
    #[derive(Default)]
    pub struct RecordingSink {
        shown: Mutex<Vec<(String, Layout, DisplayOptions)>>,
    }

    impl RecordingSink {
        pub fn shown(&self) -> Vec<(String, Layout, DisplayOptions)> {
            self.shown.lock().clone()
        }

        pub fn last(&self) -> Option<(String, Layout, DisplayOptions)> {
            self.shown.lock().last().cloned()
        }

        pub fn count(&self) -> usize {
            self.shown.lock().len()
        }
    }

    impl DisplaySink for RecordingSink {
        fn show(&self, package_name: &str, layout: &Layout, options: &DisplayOptions) -> bool {
            self.shown
                .lock()
                .push((package_name.to_owned(), layout.clone(), *options));
            true
        }
    }
}
