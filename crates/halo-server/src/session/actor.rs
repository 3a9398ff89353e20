//! Session actor and its handle.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use halo_core::backoff::ReconnectPolicy;
use halo_core::errors::Result;
use halo_core::messages::{
    CloudToGlasses, CloudToTpa, DashboardMode, DisplayView, GlassesToCloud, Layout, StopReason,
    StreamEvent, StreamType, TpaToCloud,
};
use halo_core::{ConnectionId, RelayError, SessionId, UserId};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::SessionConfig;
use super::lifecycle::{Lifecycle, LinkState, Transition};
use super::resources::ResourceTracker;
use crate::dashboard::{DashboardNotice, DashboardOrchestrator, FlushSignal, Lane};
use crate::display::{DisplayOptions, DisplaySink, GlassesLink};
use crate::metrics::{MESSAGES_REJECTED_TOTAL, RECONNECT_WINDOWS_TOTAL, SESSIONS_TORN_DOWN_TOTAL};
use crate::router::{DashboardCommand, DisplayRequest, Routed, SubscriptionRouter};
use crate::websocket::connection::{ClientConnection, Disconnect};

/// Reason given to sockets closed by teardown.
const SESSION_ENDED: &str = "session ended";
/// Reason given to sockets superseded by a newer one.
const REPLACED: &str = "replaced by a newer connection";

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum SessionCommand {
    /// A glasses socket authenticated for this session.
    GlassesConnected {
        /// The new socket.
        connection: Arc<ClientConnection>,
    },
    /// A frame from a glasses socket.
    GlassesMessage {
        /// Socket it arrived on.
        connection_id: ConnectionId,
        /// Parsed frame.
        message: GlassesToCloud,
    },
    /// A glasses socket ended.
    GlassesDisconnected {
        /// Socket that ended.
        connection_id: ConnectionId,
        /// Why.
        disconnect: Disconnect,
    },
    /// A TPA socket authenticated for this session.
    TpaConnected {
        /// Authenticated package.
        package_name: String,
        /// The new socket.
        connection: Arc<ClientConnection>,
    },
    /// A frame from a TPA socket.
    TpaMessage {
        /// Authenticated package.
        package_name: String,
        /// Socket it arrived on.
        connection_id: ConnectionId,
        /// Parsed frame.
        message: TpaToCloud,
    },
    /// A TPA socket ended.
    TpaDisconnected {
        /// Authenticated package.
        package_name: String,
        /// Socket that ended.
        connection_id: ConnectionId,
        /// Why.
        disconnect: Disconnect,
    },
    /// A system-originated stream event (transcription, translation).
    Publish(StreamEvent),
    /// New settings for an app.
    UpdateTpaSettings {
        /// Target package.
        package_name: String,
        /// New settings.
        settings: Value,
    },
    /// The glasses backoff window tagged `generation` ended.
    ReconnectWindowExpired {
        /// Timer tag.
        generation: u64,
    },
    /// A TPA backoff window ended.
    TpaReconnectWindowExpired {
        /// Waiting package.
        package_name: String,
        /// Timer tag.
        generation: u64,
    },
    /// A dashboard throttle timer fired.
    DashboardFlush(Lane),
    /// A timed main-view display ran out.
    DisplayExpired {
        /// Display tag.
        generation: u64,
    },
    /// Report the session state.
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// End the session now.
    Shutdown {
        /// Why.
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session id.
    pub session_id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Glasses link state.
    pub state: LinkState,
    /// Expired backoff windows since the last glasses connect.
    pub reconnect_attempts: u32,
    /// Whether a glasses socket is bound.
    pub glasses_connected: bool,
    /// Running apps.
    pub running_apps: Vec<String>,
    /// Known TPAs.
    pub tpas: Vec<TpaSnapshot>,
    /// Active dashboard mode.
    pub dashboard_mode: Option<DashboardMode>,
    /// Whether the always-on overlay is shown.
    pub always_on_enabled: bool,
    /// Whether the microphone is requested.
    pub microphone_enabled: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// Read-only view of one TPA.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpaSnapshot {
    /// Package.
    pub package_name: String,
    /// Link state.
    pub state: LinkState,
    /// Whether a socket is bound.
    pub connected: bool,
    /// Subscribed streams.
    pub subscriptions: Vec<StreamType>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cheap, cloneable address of a session actor.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    user_id: UserId,
    instance: u64,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        user_id: UserId,
        instance: u64,
        tx: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            instance,
            tx,
        }
    }

    /// Session id.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Owner.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub(crate) fn instance(&self) -> u64 {
        self.instance
    }

    /// Whether the actor has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the actor has exited.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Queue a command, waiting for room.
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RelayError::SessionClosed(self.session_id.to_string()))
    }

    /// Publish a system-originated stream event to subscribed TPAs.
    pub async fn publish(&self, event: StreamEvent) -> Result<()> {
        self.send(SessionCommand::Publish(event)).await
    }

    /// Push new settings to an app.
    pub async fn update_tpa_settings(&self, package_name: &str, settings: Value) -> Result<()> {
        self.send(SessionCommand::UpdateTpaSettings {
            package_name: package_name.to_owned(),
            settings,
        })
        .await
    }

    /// End the session.
    pub async fn shutdown(&self, reason: &str) -> Result<()> {
        self.send(SessionCommand::Shutdown {
            reason: reason.to_owned(),
        })
        .await
    }

    /// Current session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await
            .map_err(|_| RelayError::SessionClosed(self.session_id.to_string()))
    }
}

/// Posts timer events back into the actor's own queue.
///
/// Holds weak references so timers never keep a finished session alive.
/// When the queue is full the post waits on a task tracked by the session,
/// so teardown cancels it.
struct CommandPoster {
    tx: mpsc::WeakSender<SessionCommand>,
    resources: Weak<ResourceTracker>,
}

impl CommandPoster {
    fn new(tx: &mpsc::Sender<SessionCommand>, resources: &Arc<ResourceTracker>) -> Self {
        Self {
            tx: tx.downgrade(),
            resources: Arc::downgrade(resources),
        }
    }

    fn post(&self, command: SessionCommand) {
        let Some(tx) = self.tx.upgrade() else { return };
        match tx.try_send(command) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                let Some(resources) = self.resources.upgrade() else {
                    return;
                };
                let _ = resources.spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
        }
    }
}

impl FlushSignal for CommandPoster {
    fn request_flush(&self, lane: Lane) {
        self.post(SessionCommand::DashboardFlush(lane));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

struct MainDisplay {
    package_name: String,
    generation: u64,
}

/// Owns one user's session state. Driven by [`SessionCommand`]s.
pub struct SessionActor {
    session_id: SessionId,
    user_id: UserId,
    created_at: DateTime<Utc>,
    policy: ReconnectPolicy,
    lifecycle: Lifecycle,
    glasses: Arc<GlassesLink>,
    tpas: HashMap<String, Lifecycle>,
    router: SubscriptionRouter,
    dashboard: DashboardOrchestrator,
    resources: Arc<ResourceTracker>,
    poster: Arc<CommandPoster>,
    running_apps: BTreeSet<String>,
    app_settings: HashMap<String, Value>,
    microphone_enabled: bool,
    main_display: Option<MainDisplay>,
    display_generation: u64,
    torn_down: bool,
}

impl SessionActor {
    /// Build an actor. `commands` is the sending side of its own queue.
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        system_app: String,
        config: &SessionConfig,
        commands: &mpsc::Sender<SessionCommand>,
    ) -> Self {
        let glasses = Arc::new(GlassesLink::new());
        let resources = Arc::new(ResourceTracker::new());
        let poster = Arc::new(CommandPoster::new(commands, &resources));
        let dashboard = DashboardOrchestrator::new(
            config.dashboard,
            system_app,
            glasses.clone(),
            resources.clone(),
            poster.clone(),
        );
        Self {
            router: SubscriptionRouter::new(session_id.clone()),
            session_id,
            user_id,
            created_at: Utc::now(),
            policy: config.reconnect,
            lifecycle: Lifecycle::new(config.reconnect),
            glasses,
            tpas: HashMap::new(),
            dashboard,
            resources,
            poster,
            running_apps: BTreeSet::new(),
            app_settings: HashMap::new(),
            microphone_enabled: false,
            main_display: None,
            display_generation: 0,
            torn_down: false,
        }
    }

    /// Process commands until the session is torn down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
            if self.torn_down {
                break;
            }
        }
        self.teardown("session handle dropped");

        commands.close();
        while let Ok(command) = commands.try_recv() {
            reject_after_teardown(command);
        }
    }

    /// Apply one command.
    pub fn handle(&mut self, command: SessionCommand) {
        if self.torn_down {
            reject_after_teardown(command);
            return;
        }
        match command {
            SessionCommand::GlassesConnected { connection } => self.on_glasses_connected(connection),
            SessionCommand::GlassesMessage {
                connection_id,
                message,
            } => {
                if self.glasses.connection_id().as_ref() == Some(&connection_id) {
                    self.on_glasses_message(message);
                } else {
                    debug!(session_id = %self.session_id, conn_id = %connection_id, "frame from superseded glasses socket ignored");
                }
            }
            SessionCommand::GlassesDisconnected {
                connection_id,
                disconnect,
            } => self.on_glasses_disconnected(&connection_id, &disconnect),
            SessionCommand::TpaConnected {
                package_name,
                connection,
            } => self.on_tpa_connected(package_name, connection),
            SessionCommand::TpaMessage {
                package_name,
                connection_id,
                message,
            } => self.on_tpa_message(&package_name, &connection_id, message),
            SessionCommand::TpaDisconnected {
                package_name,
                connection_id,
                disconnect,
            } => self.on_tpa_disconnected(package_name, &connection_id, &disconnect),
            SessionCommand::Publish(event) => {
                let report = self.router.dispatch(&event);
                debug!(session_id = %self.session_id, stream = %event.stream_type, delivered = report.delivered, "system event published");
            }
            SessionCommand::UpdateTpaSettings {
                package_name,
                settings,
            } => self.on_settings_update(package_name, settings),
            SessionCommand::ReconnectWindowExpired { generation } => {
                let transition = self.lifecycle.on_backoff_expired(generation);
                self.apply_session_transition(transition);
            }
            SessionCommand::TpaReconnectWindowExpired {
                package_name,
                generation,
            } => self.on_tpa_window_expired(package_name, generation),
            SessionCommand::DashboardFlush(lane) => self.dashboard.flush(lane),
            SessionCommand::DisplayExpired { generation } => {
                if self
                    .main_display
                    .as_ref()
                    .is_some_and(|d| d.generation == generation)
                {
                    self.clear_main_display();
                }
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown { reason } => self.teardown(&reason),
        }
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut tpas: Vec<TpaSnapshot> = self
            .tpas
            .iter()
            .map(|(package_name, lifecycle)| TpaSnapshot {
                package_name: package_name.clone(),
                state: lifecycle.state(),
                connected: self.router.connection(package_name).is_some(),
                subscriptions: self
                    .router
                    .subscriptions(package_name)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default(),
            })
            .collect();
        tpas.sort_by(|a, b| a.package_name.cmp(&b.package_name));

        SessionSnapshot {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            state: self.lifecycle.state(),
            reconnect_attempts: self.lifecycle.attempts(),
            glasses_connected: self.glasses.is_connected(),
            running_apps: self.running_apps.iter().cloned().collect(),
            tpas,
            dashboard_mode: self.dashboard.mode(),
            always_on_enabled: self.dashboard.always_on_enabled(),
            microphone_enabled: self.microphone_enabled,
            created_at: self.created_at,
        }
    }

    /// Whether teardown has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ── Glasses ────────────────────────────────────────────────────────

    fn on_glasses_connected(&mut self, connection: Arc<ClientConnection>) {
        if let Some(old) = self.glasses.attach(connection.clone()) {
            if old.id != connection.id {
                let _ = old.force_close(Disconnect::permanent(REPLACED));
            }
        }
        match self.lifecycle.on_connected() {
            Transition::Connected { resumed } => {
                info!(session_id = %self.session_id, conn_id = %connection.id, resumed, "glasses connected");
            }
            _ => {
                let _ = connection.force_close(Disconnect::permanent(SESSION_ENDED));
                return;
            }
        }
        let _ = self.glasses.send(&CloudToGlasses::ConnectionAck {
            session_id: self.session_id.clone(),
            active_apps: self.active_apps(),
        });
        let _ = self.glasses.send(&CloudToGlasses::MicrophoneStateChange {
            is_microphone_enabled: self.microphone_enabled,
        });
        self.dashboard.refresh();
    }

    fn on_glasses_message(&mut self, message: GlassesToCloud) {
        match message {
            GlassesToCloud::ConnectionInit { .. } => {
                debug!(session_id = %self.session_id, "repeated connection_init ignored");
            }
            GlassesToCloud::StartApp { package_name } => self.start_app(package_name),
            GlassesToCloud::StopApp { package_name } => {
                self.stop_app(&package_name, StopReason::UserDisabled);
            }
            GlassesToCloud::PhoneNotification {
                ref app,
                ref title,
                ref content,
                ..
            } => {
                if !self.dashboard.record_notification(app, title, content) {
                    debug!(session_id = %self.session_id, "repeated phone notification not cached");
                }
                self.publish_glasses_event(&message);
            }
            other => self.publish_glasses_event(&other),
        }
    }

    fn publish_glasses_event(&mut self, message: &GlassesToCloud) {
        match message.to_stream_event() {
            Ok(Some(event)) => {
                let report = self.router.dispatch(&event);
                debug!(
                    session_id = %self.session_id,
                    stream = %event.stream_type,
                    delivered = report.delivered,
                    failed = report.failed.len(),
                    "glasses event routed"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(session_id = %self.session_id, kind = message.kind(), error = %e, "failed to convert glasses event");
            }
        }
    }

    fn on_glasses_disconnected(&mut self, connection_id: &ConnectionId, disconnect: &Disconnect) {
        if self.glasses.detach(connection_id).is_none() {
            debug!(session_id = %self.session_id, conn_id = %connection_id, "superseded glasses socket ended");
            return;
        }
        info!(
            session_id = %self.session_id,
            conn_id = %connection_id,
            reason = disconnect.reason(),
            kind = disconnect.kind(),
            "glasses disconnected"
        );
        let transition = self.lifecycle.on_disconnect(disconnect);
        self.apply_session_transition(transition);
    }

    fn apply_session_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Reconnecting { attempt, delay } => {
                info!(
                    session_id = %self.session_id,
                    attempt,
                    delay_ms = duration_ms(delay),
                    "waiting for glasses to reconnect"
                );
                counter!(RECONNECT_WINDOWS_TOTAL, "peer" => "glasses").increment(1);
                let generation = self.lifecycle.generation();
                self.schedule(delay, SessionCommand::ReconnectWindowExpired { generation });
            }
            Transition::Terminated { reason } => self.teardown(&reason),
            Transition::Connected { .. } | Transition::Ignored => {}
        }
    }

    // ── Apps / TPAs ────────────────────────────────────────────────────

    fn start_app(&mut self, package_name: String) {
        info!(session_id = %self.session_id, package_name, "app started");
        if self.running_apps.insert(package_name) {
            self.send_app_state();
        }
    }

    fn stop_app(&mut self, package_name: &str, reason: StopReason) {
        info!(session_id = %self.session_id, package_name, ?reason, "app stopped");
        if let Some(conn) = self.router.connection(package_name) {
            let _ = conn.send_json(&CloudToTpa::AppStopped { reason });
        }
        self.remove_tpa(package_name, "app stopped");
    }

    fn on_tpa_connected(&mut self, package_name: String, connection: Arc<ClientConnection>) {
        if let Some(old) = self.router.attach(&package_name, connection.clone()) {
            if old.id != connection.id {
                let _ = old.force_close(Disconnect::permanent(REPLACED));
            }
        }
        let policy = self.policy;
        let lifecycle = self
            .tpas
            .entry(package_name.clone())
            .or_insert_with(|| Lifecycle::new(policy));
        if let Transition::Connected { resumed } = lifecycle.on_connected() {
            info!(session_id = %self.session_id, package_name, conn_id = %connection.id, resumed, "tpa connected");
        }

        let settings = self
            .app_settings
            .get(&package_name)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let _ = connection.send_json(&CloudToTpa::ConnectionAck {
            session_id: self.session_id.clone(),
            settings,
        });
        if self.running_apps.insert(package_name) {
            self.send_app_state();
        }
    }

    fn on_tpa_message(
        &mut self,
        package_name: &str,
        connection_id: &ConnectionId,
        message: TpaToCloud,
    ) {
        if !self.is_current_tpa(package_name, connection_id) {
            debug!(session_id = %self.session_id, package_name, "frame from superseded tpa socket ignored");
            return;
        }
        let kind = message.kind();
        match self.router.route_from_tpa(package_name, message) {
            Ok(routed) => self.apply_routed(package_name, routed),
            Err(e) => {
                warn!(session_id = %self.session_id, package_name, kind, error = %e, "tpa message rejected");
                counter!(MESSAGES_REJECTED_TOTAL, "peer" => "tpa").increment(1);
            }
        }
    }

    fn apply_routed(&mut self, package_name: &str, routed: Routed) {
        match routed {
            Routed::Subscriptions { microphone } => {
                if let Some(enabled) = microphone {
                    self.set_microphone(enabled);
                }
            }
            Routed::Display(request) => self.show_tpa_display(package_name, request),
            Routed::Dashboard(command) => self.apply_dashboard(package_name, command),
            Routed::Glasses(message) => {
                if !self.glasses.send(&message) {
                    debug!(session_id = %self.session_id, package_name, "glasses offline; request dropped");
                }
            }
        }
    }

    fn apply_dashboard(&mut self, package_name: &str, command: DashboardCommand) {
        let result = match command {
            DashboardCommand::Content { content, modes } => self
                .dashboard
                .contribute_content(package_name, content, &modes)
                .map(|()| None),
            DashboardCommand::SetMode(mode) => self.dashboard.set_mode(package_name, mode),
            DashboardCommand::SystemSection { section, content } => self
                .dashboard
                .set_system_section(package_name, section, content)
                .map(|()| None),
            DashboardCommand::SetAlwaysOn(enabled) => {
                self.dashboard.set_always_on_enabled(package_name, enabled)
            }
        };
        match result {
            Ok(Some(notice)) => self.broadcast_notice(notice),
            Ok(None) => {}
            Err(_) => {
                counter!(MESSAGES_REJECTED_TOTAL, "peer" => "tpa").increment(1);
            }
        }
    }

    fn broadcast_notice(&self, notice: DashboardNotice) {
        let report = match notice {
            DashboardNotice::ModeChanged(mode) => self.router.notify(
                StreamType::DashboardModeChange,
                &CloudToTpa::DashboardModeChanged { mode },
            ),
            DashboardNotice::AlwaysOnChanged(enabled) => self.router.notify(
                StreamType::DashboardAlwaysOnChange,
                &CloudToTpa::DashboardAlwaysOnChanged { enabled },
            ),
        };
        debug!(session_id = %self.session_id, ?notice, delivered = report.delivered, "dashboard notice sent");
    }

    fn show_tpa_display(&mut self, package_name: &str, request: DisplayRequest) {
        if request.view != DisplayView::Main && package_name != self.dashboard.system_app() {
            warn!(session_id = %self.session_id, package_name, view = ?request.view, "display view reserved for the system app");
            counter!(MESSAGES_REJECTED_TOTAL, "peer" => "tpa").increment(1);
            return;
        }
        let options = DisplayOptions {
            view: request.view,
            duration: request.duration,
        };
        let _ = self.glasses.show(package_name, &request.layout, &options);
        if request.view != DisplayView::Main {
            return;
        }
        self.display_generation += 1;
        let generation = self.display_generation;
        self.main_display = Some(MainDisplay {
            package_name: package_name.to_owned(),
            generation,
        });
        if let Some(duration) = request.duration {
            self.schedule(duration, SessionCommand::DisplayExpired { generation });
        }
    }

    fn clear_main_display(&mut self) {
        if let Some(display) = self.main_display.take() {
            let _ = self.glasses.show(
                &display.package_name,
                &Layout::Empty,
                &DisplayOptions::view(DisplayView::Main),
            );
        }
    }

    fn on_tpa_disconnected(
        &mut self,
        package_name: String,
        connection_id: &ConnectionId,
        disconnect: &Disconnect,
    ) {
        if !self.is_current_tpa(&package_name, connection_id) {
            debug!(session_id = %self.session_id, package_name, "superseded tpa socket ended");
            return;
        }
        let _ = self.router.detach(&package_name);
        info!(
            session_id = %self.session_id,
            package_name,
            reason = disconnect.reason(),
            kind = disconnect.kind(),
            "tpa disconnected"
        );
        let Some(lifecycle) = self.tpas.get_mut(&package_name) else {
            return;
        };
        let transition = lifecycle.on_disconnect(disconnect);
        let generation = lifecycle.generation();
        self.apply_tpa_transition(package_name, transition, generation);
    }

    fn on_tpa_window_expired(&mut self, package_name: String, generation: u64) {
        let Some(lifecycle) = self.tpas.get_mut(&package_name) else {
            return;
        };
        let transition = lifecycle.on_backoff_expired(generation);
        let generation = lifecycle.generation();
        self.apply_tpa_transition(package_name, transition, generation);
    }

    fn apply_tpa_transition(&mut self, package_name: String, transition: Transition, generation: u64) {
        match transition {
            Transition::Reconnecting { attempt, delay } => {
                debug!(
                    session_id = %self.session_id,
                    package_name,
                    attempt,
                    delay_ms = duration_ms(delay),
                    "waiting for tpa to reconnect"
                );
                counter!(RECONNECT_WINDOWS_TOTAL, "peer" => "tpa").increment(1);
                self.schedule(
                    delay,
                    SessionCommand::TpaReconnectWindowExpired {
                        package_name,
                        generation,
                    },
                );
            }
            Transition::Terminated { reason } => self.remove_tpa(&package_name, &reason),
            Transition::Connected { .. } | Transition::Ignored => {}
        }
    }

    /// Forget a TPA for good: subscriptions, dashboard content, display.
    fn remove_tpa(&mut self, package_name: &str, reason: &str) {
        let _ = self.tpas.remove(package_name);
        if let Some(conn) = self.router.remove(package_name) {
            let _ = conn.force_close(Disconnect::permanent(reason));
        }
        self.dashboard.on_tpa_disconnected(package_name);
        if self
            .main_display
            .as_ref()
            .is_some_and(|d| d.package_name == package_name)
        {
            self.clear_main_display();
        }
        self.set_microphone(self.router.needs_microphone());
        if self.running_apps.remove(package_name) {
            self.send_app_state();
        }
        info!(session_id = %self.session_id, package_name, reason, "tpa removed");
    }

    fn on_settings_update(&mut self, package_name: String, settings: Value) {
        if let Some(conn) = self.router.connection(&package_name) {
            let _ = conn.send_json(&CloudToTpa::SettingsUpdate {
                package_name: package_name.clone(),
                settings: settings.clone(),
            });
        }
        let _ = self.app_settings.insert(package_name, settings);
    }

    fn is_current_tpa(&self, package_name: &str, connection_id: &ConnectionId) -> bool {
        self.router
            .connection(package_name)
            .is_some_and(|c| &c.id == connection_id)
    }

    // ── Glasses-bound state ────────────────────────────────────────────

    fn set_microphone(&mut self, enabled: bool) {
        if self.microphone_enabled == enabled {
            return;
        }
        self.microphone_enabled = enabled;
        info!(session_id = %self.session_id, enabled, "microphone state changed");
        let _ = self.glasses.send(&CloudToGlasses::MicrophoneStateChange {
            is_microphone_enabled: enabled,
        });
    }

    fn send_app_state(&self) {
        let _ = self.glasses.send(&CloudToGlasses::AppStateChange {
            active_apps: self.active_apps(),
        });
    }

    fn active_apps(&self) -> Vec<String> {
        self.running_apps.iter().cloned().collect()
    }

    fn schedule(&self, delay: Duration, command: SessionCommand) {
        let poster = self.poster.clone();
        let _ = self
            .resources
            .spawn_after(delay, move || poster.post(command));
    }

    // ── Teardown ───────────────────────────────────────────────────────

    /// Release everything the session owns. Runs at most once.
    fn teardown(&mut self, reason: &str) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let _ = self.lifecycle.terminate(reason.to_owned());
        info!(session_id = %self.session_id, user_id = %self.user_id, reason, "session torn down");

        let stopped = CloudToTpa::AppStopped {
            reason: StopReason::SystemStop,
        };
        for (package_name, conn) in self.router.clear() {
            let _ = conn.send_json(&stopped);
            let _ = conn.force_close(Disconnect::permanent(SESSION_ENDED));
            debug!(session_id = %self.session_id, package_name, "tpa released");
        }
        self.tpas.clear();
        self.dashboard.release();
        let _ = self.resources.dispose();
        if let Some(conn) = self.glasses.take() {
            let _ = conn.force_close(Disconnect::permanent(SESSION_ENDED));
        }
        counter!(SESSIONS_TORN_DOWN_TOTAL).increment(1);
    }
}

/// Close sockets that raced with teardown.
fn reject_after_teardown(command: SessionCommand) {
    match command {
        SessionCommand::GlassesConnected { connection }
        | SessionCommand::TpaConnected { connection, .. } => {
            let _ = connection.force_close(Disconnect::permanent(SESSION_ENDED));
        }
        _ => {}
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{ConnectionRole, Outbound, test_connection};
    use serde_json::json;

    const SYSTEM: &str = "system.dashboard";

    struct Harness {
        actor: SessionActor,
        _tx: mpsc::Sender<SessionCommand>,
        rx: mpsc::Receiver<SessionCommand>,
    }

    fn harness(max_attempts: u32) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let mut config = SessionConfig::default();
        config.reconnect.max_attempts = max_attempts;
        config.dashboard.throttle = Duration::ZERO;
        let actor = SessionActor::new(
            SessionId::from("alice"),
            UserId::from("alice"),
            SYSTEM.to_string(),
            &config,
            &tx,
        );
        Harness { actor, _tx: tx, rx }
    }

    fn frames(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn of_type<'a>(frames: &'a [serde_json::Value], kind: &str) -> Vec<&'a serde_json::Value> {
        frames.iter().filter(|f| f["type"] == kind).collect()
    }

    fn connect_glasses(h: &mut Harness) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = test_connection(ConnectionRole::Glasses, 64);
        h.actor.handle(SessionCommand::GlassesConnected {
            connection: conn.clone(),
        });
        (conn, rx)
    }

    fn connect_tpa(h: &mut Harness, package: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = test_connection(ConnectionRole::Tpa, 64);
        h.actor.handle(SessionCommand::TpaConnected {
            package_name: package.to_string(),
            connection: conn.clone(),
        });
        (conn, rx)
    }

    fn tpa_says(h: &mut Harness, package: &str, conn: &ClientConnection, value: serde_json::Value) {
        h.actor.handle(SessionCommand::TpaMessage {
            package_name: package.to_string(),
            connection_id: conn.id.clone(),
            message: serde_json::from_value(value).unwrap(),
        });
    }

    fn glasses_says(h: &mut Harness, conn: &ClientConnection, value: serde_json::Value) {
        h.actor.handle(SessionCommand::GlassesMessage {
            connection_id: conn.id.clone(),
            message: serde_json::from_value(value).unwrap(),
        });
    }

    #[tokio::test]
    async fn post_to_full_queue_waits_on_a_tracked_task() {
        let (tx, mut rx) = mpsc::channel(1);
        let resources = Arc::new(ResourceTracker::new());
        let poster = CommandPoster::new(&tx, &resources);

        poster.post(SessionCommand::DashboardFlush(Lane::Primary));
        poster.post(SessionCommand::DashboardFlush(Lane::AlwaysOn));
        assert_eq!(resources.active(), 1);

        assert!(resources.dispose());
        tokio::task::yield_now().await;
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionCommand::DashboardFlush(Lane::Primary))
        ));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(resources.active(), 0);
    }

    #[tokio::test]
    async fn glasses_connect_acks_with_session_and_microphone() {
        let mut h = harness(5);
        let (_conn, mut rx) = connect_glasses(&mut h);
        let frames = frames(&mut rx);
        assert_eq!(frames[0]["type"], "connection_ack");
        assert_eq!(frames[0]["sessionId"], "alice");
        assert_eq!(frames[1]["type"], "microphone_state_change");
        assert_eq!(frames[1]["isMicrophoneEnabled"], false);
        assert_eq!(h.actor.snapshot().state, LinkState::Connected);
    }

    #[tokio::test]
    async fn subscribed_tpa_receives_glasses_event() {
        let mut h = harness(5);
        let (glasses, _g_rx) = connect_glasses(&mut h);
        let (tpa, mut t_rx) = connect_tpa(&mut h, "com.weather");
        assert_eq!(frames(&mut t_rx)[0]["type"], "tpa_connection_ack");

        tpa_says(&mut h, "com.weather", &tpa, json!({
            "type": "subscription_update",
            "packageName": "com.weather",
            "subscriptions": ["location_update"]
        }));
        glasses_says(&mut h, &glasses, json!({"type": "location_update", "lat": 1.5, "lng": 2.5}));

        let frames = frames(&mut t_rx);
        let streams = of_type(&frames, "data_stream");
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0]["streamType"], "location_update");
        assert_eq!(streams[0]["data"]["lat"], 1.5);
    }

    #[tokio::test]
    async fn exhausted_reconnect_window_tears_down_once() {
        let mut h = harness(2);
        let (glasses, _g_rx) = connect_glasses(&mut h);
        let (tpa, mut t_rx) = connect_tpa(&mut h, "com.weather");
        let _ = frames(&mut t_rx);

        h.actor.handle(SessionCommand::GlassesDisconnected {
            connection_id: glasses.id.clone(),
            disconnect: Disconnect::transient("network"),
        });
        assert_eq!(h.actor.snapshot().state, LinkState::Reconnecting);
        assert!(!tpa.is_closed());

        for _ in 0..2 {
            let generation = h.actor.lifecycle.generation();
            h.actor.handle(SessionCommand::ReconnectWindowExpired { generation });
        }
        assert!(h.actor.is_torn_down());
        assert!(tpa.is_closed());
        assert_eq!(tpa.close_reason(), Some(Disconnect::permanent(SESSION_ENDED)));

        let frames = frames(&mut t_rx);
        let stopped = of_type(&frames, "app_stopped");
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0]["reason"], "system_stop");

        // Late events after teardown are no-ops.
        h.actor.handle(SessionCommand::Shutdown { reason: "again".into() });
        h.actor.handle(SessionCommand::ReconnectWindowExpired { generation: u64::MAX });
        // no second app_stopped, nor anything else, after the first teardown
        assert!(t_rx.try_recv().is_err());
        let (late, _late_rx) = test_connection(ConnectionRole::Glasses, 4);
        h.actor.handle(SessionCommand::GlassesConnected { connection: late.clone() });
        assert!(late.is_closed());
    }

    #[tokio::test]
    async fn reconnect_within_window_keeps_session() {
        let mut h = harness(3);
        let (glasses, _g_rx) = connect_glasses(&mut h);
        let (tpa, _t_rx) = connect_tpa(&mut h, "com.weather");

        h.actor.handle(SessionCommand::GlassesDisconnected {
            connection_id: glasses.id.clone(),
            disconnect: Disconnect::transient("network"),
        });
        let generation = h.actor.lifecycle.generation();
        h.actor.handle(SessionCommand::ReconnectWindowExpired { generation });
        assert_eq!(h.actor.snapshot().reconnect_attempts, 1);

        let (_again, mut rx) = connect_glasses(&mut h);
        let snapshot = h.actor.snapshot();
        assert_eq!(snapshot.state, LinkState::Connected);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.running_apps, vec!["com.weather".to_string()]);
        assert!(!tpa.is_closed());

        let frames = frames(&mut rx);
        assert_eq!(frames[0]["type"], "connection_ack");
        assert_eq!(frames[0]["activeApps"], json!(["com.weather"]));
    }

    #[tokio::test]
    async fn normal_close_skips_window() {
        let mut h = harness(5);
        let (glasses, _g_rx) = connect_glasses(&mut h);
        h.actor.handle(SessionCommand::GlassesDisconnected {
            connection_id: glasses.id.clone(),
            disconnect: Disconnect::permanent("closed by peer"),
        });
        assert!(h.actor.is_torn_down());
    }

    #[tokio::test]
    async fn superseded_socket_events_ignored() {
        let mut h = harness(5);
        let (first, _first_rx) = connect_glasses(&mut h);
        let (second, _second_rx) = connect_glasses(&mut h);
        assert!(first.is_closed());

        h.actor.handle(SessionCommand::GlassesDisconnected {
            connection_id: first.id.clone(),
            disconnect: Disconnect::permanent(REPLACED),
        });
        assert!(!h.actor.is_torn_down());
        assert_eq!(h.actor.glasses.connection_id(), Some(second.id.clone()));
    }

    #[tokio::test]
    async fn stop_app_notifies_tpa_and_glasses() {
        let mut h = harness(5);
        let (glasses, mut g_rx) = connect_glasses(&mut h);
        let (tpa, mut t_rx) = connect_tpa(&mut h, "com.weather");
        let _ = frames(&mut g_rx);
        let _ = frames(&mut t_rx);

        glasses_says(&mut h, &glasses, json!({"type": "stop_app", "packageName": "com.weather"}));

        let tpa_frames = frames(&mut t_rx);
        assert_eq!(of_type(&tpa_frames, "app_stopped")[0]["reason"], "user_disabled");
        assert!(tpa.is_closed());

        let glasses_frames = frames(&mut g_rx);
        let state = of_type(&glasses_frames, "app_state_change");
        assert_eq!(state.last().unwrap()["activeApps"], json!([]));
        assert!(h.actor.snapshot().tpas.is_empty());
    }

    #[tokio::test]
    async fn transcription_subscription_turns_microphone_on_and_off() {
        let mut h = harness(5);
        let (_glasses, mut g_rx) = connect_glasses(&mut h);
        let (tpa, _t_rx) = connect_tpa(&mut h, "com.captions");
        let _ = frames(&mut g_rx);

        tpa_says(&mut h, "com.captions", &tpa, json!({
            "type": "subscription_update",
            "packageName": "com.captions",
            "subscriptions": ["transcription"]
        }));
        let on = frames(&mut g_rx);
        assert_eq!(of_type(&on, "microphone_state_change")[0]["isMicrophoneEnabled"], true);

        h.actor.handle(SessionCommand::TpaDisconnected {
            package_name: "com.captions".into(),
            connection_id: tpa.id.clone(),
            disconnect: Disconnect::permanent("closed by peer"),
        });
        let off = frames(&mut g_rx);
        assert_eq!(of_type(&off, "microphone_state_change")[0]["isMicrophoneEnabled"], false);
    }

    #[tokio::test]
    async fn transient_tpa_loss_keeps_subscriptions() {
        let mut h = harness(5);
        let (glasses, _g_rx) = connect_glasses(&mut h);
        let (tpa, _t_rx) = connect_tpa(&mut h, "com.weather");
        tpa_says(&mut h, "com.weather", &tpa, json!({
            "type": "subscription_update",
            "packageName": "com.weather",
            "subscriptions": ["button_press"]
        }));
        h.actor.handle(SessionCommand::TpaDisconnected {
            package_name: "com.weather".into(),
            connection_id: tpa.id.clone(),
            disconnect: Disconnect::transient("network"),
        });

        let (again, mut rx) = connect_tpa(&mut h, "com.weather");
        let _ = frames(&mut rx);
        glasses_says(&mut h, &glasses, json!({"type": "button_press", "buttonId": "main", "pressType": "short"}));
        assert_eq!(of_type(&frames(&mut rx), "data_stream").len(), 1);
        assert!(!again.is_closed());
    }

    #[tokio::test]
    async fn departed_tpa_content_leaves_dashboard() {
        let mut h = harness(5);
        let (_glasses, mut g_rx) = connect_glasses(&mut h);
        let (tpa, _t_rx) = connect_tpa(&mut h, "com.weather");
        tpa_says(&mut h, "com.weather", &tpa, json!({
            "type": "dashboard_content_update",
            "packageName": "com.weather",
            "content": "Sunny 22C",
            "modes": ["main"]
        }));
        let shown = frames(&mut g_rx);
        let with = of_type(&shown, "display_event");
        assert!(with.last().unwrap()["layout"]["bottomText"].as_str().unwrap().contains("Sunny"));

        h.actor.handle(SessionCommand::TpaDisconnected {
            package_name: "com.weather".into(),
            connection_id: tpa.id.clone(),
            disconnect: Disconnect::permanent("closed by peer"),
        });
        let after = frames(&mut g_rx);
        let without = of_type(&after, "display_event");
        assert_eq!(without.last().unwrap()["view"], "dashboard");
        assert!(!without.last().unwrap()["layout"]["bottomText"].as_str().unwrap().contains("Sunny"));
    }

    #[tokio::test]
    async fn mode_change_by_system_app_notifies_subscribers() {
        let mut h = harness(5);
        let (_glasses, _g_rx) = connect_glasses(&mut h);
        let (system, _s_rx) = connect_tpa(&mut h, SYSTEM);
        let (watcher, mut w_rx) = connect_tpa(&mut h, "com.watcher");
        tpa_says(&mut h, "com.watcher", &watcher, json!({
            "type": "subscription_update",
            "packageName": "com.watcher",
            "subscriptions": ["dashboard_mode_change"]
        }));
        let _ = frames(&mut w_rx);

        tpa_says(&mut h, SYSTEM, &system, json!({
            "type": "dashboard_mode_change",
            "packageName": SYSTEM,
            "mode": "expanded"
        }));
        let notices = frames(&mut w_rx);
        assert_eq!(of_type(&notices, "dashboard_mode_changed")[0]["mode"], "expanded");
        assert_eq!(h.actor.snapshot().dashboard_mode, Some(DashboardMode::Expanded));

        // A regular TPA cannot do the same.
        tpa_says(&mut h, "com.watcher", &watcher, json!({
            "type": "dashboard_mode_change",
            "packageName": "com.watcher",
            "mode": "main"
        }));
        assert_eq!(h.actor.snapshot().dashboard_mode, Some(DashboardMode::Expanded));
    }

    #[tokio::test]
    async fn repeated_notification_reaches_subscriber_but_is_cached_once() {
        let mut h = harness(5);
        let (glasses, _g_rx) = connect_glasses(&mut h);
        let (tpa, mut t_rx) = connect_tpa(&mut h, "com.notify");
        tpa_says(&mut h, "com.notify", &tpa, json!({
            "type": "subscription_update",
            "packageName": "com.notify",
            "subscriptions": ["phone_notification"]
        }));
        let note = json!({
            "type": "phone_notification",
            "notificationId": "n1",
            "app": "sms",
            "title": "Mom",
            "content": "Call me"
        });
        glasses_says(&mut h, &glasses, note.clone());
        glasses_says(&mut h, &glasses, note);

        let frames = frames(&mut t_rx);
        let streams = of_type(&frames, "data_stream");
        assert_eq!(streams.len(), 2);
        assert!(streams.iter().all(|f| f["data"]["title"] == "Mom"));
        assert_eq!(h.actor.dashboard.notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_display_is_cleared() {
        let mut h = harness(5);
        let (_glasses, mut g_rx) = connect_glasses(&mut h);
        let (tpa, _t_rx) = connect_tpa(&mut h, "com.alerts");
        let _ = frames(&mut g_rx);

        tpa_says(&mut h, "com.alerts", &tpa, json!({
            "type": "display_event",
            "packageName": "com.alerts",
            "layout": {"layoutType": "text_wall", "text": "Meeting in 5"},
            "durationMs": 3000
        }));
        let shown = frames(&mut g_rx);
        assert_eq!(of_type(&shown, "display_event")[0]["view"], "main");

        let command = tokio::time::timeout(Duration::from_secs(5), h.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(command, SessionCommand::DisplayExpired { .. }));
        h.actor.handle(command);

        let cleared = frames(&mut g_rx);
        let events = of_type(&cleared, "display_event");
        assert_eq!(events[0]["layout"]["layoutType"], "empty");
    }

    #[tokio::test]
    async fn regular_tpa_cannot_target_dashboard_view() {
        let mut h = harness(5);
        let (_glasses, mut g_rx) = connect_glasses(&mut h);
        let (tpa, _t_rx) = connect_tpa(&mut h, "com.sneaky");
        let _ = frames(&mut g_rx);
        tpa_says(&mut h, "com.sneaky", &tpa, json!({
            "type": "display_event",
            "packageName": "com.sneaky",
            "view": "dashboard",
            "layout": {"layoutType": "text_wall", "text": "hi"}
        }));
        assert!(of_type(&frames(&mut g_rx), "display_event").is_empty());
    }

    #[tokio::test]
    async fn settings_update_reaches_connected_tpa_and_next_ack() {
        let mut h = harness(5);
        let (tpa, mut t_rx) = connect_tpa(&mut h, "com.weather");
        let _ = frames(&mut t_rx);
        h.actor.handle(SessionCommand::UpdateTpaSettings {
            package_name: "com.weather".into(),
            settings: json!({"units": "metric"}),
        });
        assert_eq!(of_type(&frames(&mut t_rx), "settings_update")[0]["settings"]["units"], "metric");

        h.actor.handle(SessionCommand::TpaDisconnected {
            package_name: "com.weather".into(),
            connection_id: tpa.id.clone(),
            disconnect: Disconnect::transient("network"),
        });
        let (_again, mut rx) = connect_tpa(&mut h, "com.weather");
        assert_eq!(frames(&mut rx)[0]["settings"]["units"], "metric");
    }

    #[tokio::test]
    async fn run_loop_answers_snapshot_and_stops_on_shutdown() {
        let (tx, rx) = mpsc::channel(16);
        let actor = SessionActor::new(
            SessionId::from("bob"),
            UserId::from("bob"),
            SYSTEM.to_string(),
            &SessionConfig::default(),
            &tx,
        );
        let handle = SessionHandle::new(SessionId::from("bob"), UserId::from("bob"), 1, tx);
        let task = tokio::spawn(actor.run(rx));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, LinkState::Connecting);
        assert_eq!(snapshot.dashboard_mode, Some(DashboardMode::Main));

        handle.shutdown("test").await.unwrap();
        task.await.unwrap();
        assert!(handle.is_closed());
        assert!(handle.snapshot().await.is_err());
    }
}
