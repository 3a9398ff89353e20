//! Per-session subscription router.
//!
//! Tracks which stream types each TPA subscribed to and fans glasses events
//! out to them. A TPA's subscriptions survive a transient disconnect and
//! are dropped only when the TPA is removed for good.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use halo_core::errors::Result;
use halo_core::messages::{
    CloudToGlasses, CloudToTpa, DashboardMode, DisplayView, Layout, StreamEvent, StreamType,
    SystemSection, TpaToCloud,
};
use halo_core::{RelayError, SessionId};
use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::TPA_DELIVERY_DROPS_TOTAL;
use crate::websocket::connection::ClientConnection;

/// Outcome of a fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers the message was queued for.
    pub delivered: usize,
    /// Subscribers whose channel was full or closed.
    pub failed: Vec<String>,
}

/// A TPA's request to show something on the main view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayRequest {
    /// Target view.
    pub view: DisplayView,
    /// What to show.
    pub layout: Layout,
    /// Clear after this long.
    pub duration: Option<Duration>,
}

/// Dashboard operation extracted from a TPA message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DashboardCommand {
    /// Contribute content to mode queues.
    Content {
        /// Text to show.
        content: String,
        /// Target modes.
        modes: Vec<DashboardMode>,
    },
    /// Switch the active mode.
    SetMode(Option<DashboardMode>),
    /// Replace a system section.
    SystemSection {
        /// Which corner.
        section: SystemSection,
        /// New text.
        content: String,
    },
    /// Toggle the always-on overlay.
    SetAlwaysOn(bool),
}

/// Where a TPA message must go next.
#[derive(Clone, Debug, PartialEq)]
pub enum Routed {
    /// Subscriptions were replaced. `Some` when the microphone need flipped.
    Subscriptions {
        /// New microphone requirement, if it changed.
        microphone: Option<bool>,
    },
    /// Display request for the session's display sink.
    Display(DisplayRequest),
    /// Dashboard operation.
    Dashboard(DashboardCommand),
    /// Request forwarded to the glasses.
    Glasses(CloudToGlasses),
}

/// Pub/sub table for one session.
pub struct SubscriptionRouter {
    session_id: SessionId,
    subscriptions: HashMap<String, BTreeSet<StreamType>>,
    connections: HashMap<String, Arc<ClientConnection>>,
}

impl SubscriptionRouter {
    /// Empty router for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            subscriptions: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    /// Bind a TPA's live socket. Returns the socket it replaces.
    pub fn attach(
        &mut self,
        package_name: &str,
        connection: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        self.connections.insert(package_name.to_owned(), connection)
    }

    /// Unbind a TPA's socket but keep its subscriptions.
    pub fn detach(&mut self, package_name: &str) -> Option<Arc<ClientConnection>> {
        self.connections.remove(package_name)
    }

    /// Forget a TPA entirely. Returns its socket, if one was bound.
    pub fn remove(&mut self, package_name: &str) -> Option<Arc<ClientConnection>> {
        let _ = self.subscriptions.remove(package_name);
        self.connections.remove(package_name)
    }

    /// Forget every TPA, returning the bound sockets.
    pub fn clear(&mut self) -> Vec<(String, Arc<ClientConnection>)> {
        self.subscriptions.clear();
        self.connections.drain().collect()
    }

    /// A TPA's live socket.
    pub fn connection(&self, package_name: &str) -> Option<&Arc<ClientConnection>> {
        self.connections.get(package_name)
    }

    /// Packages with a live socket.
    pub fn connected(&self) -> impl Iterator<Item = (&str, &Arc<ClientConnection>)> {
        self.connections.iter().map(|(p, c)| (p.as_str(), c))
    }

    /// A TPA's subscriptions.
    pub fn subscriptions(&self, package_name: &str) -> Option<&BTreeSet<StreamType>> {
        self.subscriptions.get(package_name)
    }

    /// Replace a TPA's subscriptions.
    ///
    /// Returns the new microphone requirement if it changed.
    pub fn update_subscriptions(
        &mut self,
        package_name: &str,
        stream_types: impl IntoIterator<Item = StreamType>,
    ) -> Option<bool> {
        let before = self.needs_microphone();
        let set: BTreeSet<StreamType> = stream_types.into_iter().collect();
        debug!(
            session_id = %self.session_id,
            package_name,
            streams = ?set,
            "subscriptions updated"
        );
        if set.is_empty() {
            let _ = self.subscriptions.remove(package_name);
        } else {
            let _ = self.subscriptions.insert(package_name.to_owned(), set);
        }
        let after = self.needs_microphone();
        (before != after).then_some(after)
    }

    /// Packages subscribed to `stream_type`, sorted.
    pub fn subscribers(&self, stream_type: StreamType) -> Vec<&str> {
        let mut packages: Vec<&str> = self
            .subscriptions
            .iter()
            .filter(|(_, set)| set.contains(&stream_type))
            .map(|(p, _)| p.as_str())
            .collect();
        packages.sort_unstable();
        packages
    }

    /// Whether any subscription needs the glasses microphone.
    pub fn needs_microphone(&self) -> bool {
        self.subscriptions
            .values()
            .any(|set| set.iter().any(|s| s.needs_microphone()))
    }

    /// Fan a glasses event out to its subscribers.
    pub fn dispatch(&self, event: &StreamEvent) -> DispatchReport {
        self.notify(
            event.stream_type,
            &CloudToTpa::DataStream {
                stream_type: event.stream_type,
                data: event.data.clone(),
            },
        )
    }

    /// Send `message` to every live subscriber of `stream_type`.
    ///
    /// The message is serialized once. A failed subscriber never stops
    /// delivery to the others.
    pub fn notify(&self, stream_type: StreamType, message: &CloudToTpa) -> DispatchReport {
        let mut report = DispatchReport::default();
        let subscribers = self.subscribers(stream_type);
        if subscribers.is_empty() {
            return report;
        }
        let json = match serde_json::to_string(message) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(session_id = %self.session_id, stream = %stream_type, error = %e, "failed to serialize stream message");
                return report;
            }
        };
        for package_name in subscribers {
            let Some(conn) = self.connections.get(package_name) else {
                continue;
            };
            if conn.send(json.clone()) {
                report.delivered += 1;
            } else {
                warn!(
                    session_id = %self.session_id,
                    package_name,
                    stream = %stream_type,
                    "delivery to tpa failed"
                );
                counter!(TPA_DELIVERY_DROPS_TOTAL).increment(1);
                report.failed.push(package_name.to_owned());
            }
        }
        report
    }

    /// Validate a TPA message and decide where it goes.
    ///
    /// The claimed package must match the socket's package and any claimed
    /// session must be this one. Subscription updates are applied here.
    pub fn route_from_tpa(&mut self, sender: &str, message: TpaToCloud) -> Result<Routed> {
        if message.package_name() != sender {
            return Err(RelayError::Unauthorized(format!(
                "{sender} cannot act as {}",
                message.package_name()
            )));
        }
        if message.session_id().is_some_and(|sid| *sid != self.session_id) {
            return Err(RelayError::Unauthorized(format!(
                "{sender} is not bound to that session"
            )));
        }

        let routed = match message {
            TpaToCloud::ConnectionInit { .. } => {
                return Err(RelayError::Protocol("connection already initialized".into()));
            }
            TpaToCloud::SubscriptionUpdate { subscriptions, .. } => Routed::Subscriptions {
                microphone: self.update_subscriptions(sender, subscriptions),
            },
            TpaToCloud::DisplayEvent {
                view,
                layout,
                duration_ms,
                ..
            } => Routed::Display(DisplayRequest {
                view,
                layout,
                duration: duration_ms.map(Duration::from_millis),
            }),
            TpaToCloud::DashboardContentUpdate { content, modes, .. } => {
                Routed::Dashboard(DashboardCommand::Content { content, modes })
            }
            TpaToCloud::DashboardModeChange { mode, .. } => {
                Routed::Dashboard(DashboardCommand::SetMode(mode))
            }
            TpaToCloud::DashboardSystemUpdate {
                section, content, ..
            } => Routed::Dashboard(DashboardCommand::SystemSection { section, content }),
            TpaToCloud::DashboardAlwaysOnChange { enabled, .. } => {
                Routed::Dashboard(DashboardCommand::SetAlwaysOn(enabled))
            }
            TpaToCloud::PhotoRequest {
                request_id,
                save_to_gallery,
                ..
            } => Routed::Glasses(CloudToGlasses::PhotoRequest {
                request_id,
                app_id: sender.to_owned(),
                save_to_gallery,
            }),
            TpaToCloud::VideoStreamRequest { request_id, .. } => {
                Routed::Glasses(CloudToGlasses::VideoStreamRequest {
                    request_id,
                    app_id: sender.to_owned(),
                })
            }
            TpaToCloud::RequestSingle { data_type, .. } => {
                Routed::Glasses(CloudToGlasses::RequestSingle { data_type })
            }
        };
        Ok(routed)
    }
}
