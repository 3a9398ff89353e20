//! Session registry.
//!
//! Maps session ids to live actors. A glasses socket for an unknown user
//! spawns a new actor; one for a known user is handed to the existing
//! actor, which supersedes the old socket. Entries are removed by the
//! actor's own task when it exits, keyed on its instance number so a
//! finished actor never evicts its successor.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use halo_core::errors::Result;
use halo_core::{RelayError, SessionId};
use metrics::gauge;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::SessionConfig;
use super::actor::{SessionActor, SessionCommand, SessionHandle};
use crate::metrics::SESSIONS_ACTIVE;
use crate::services::{AuthenticatedUser, TpaDirectory};
use crate::websocket::connection::ClientConnection;

/// All live sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    config: SessionConfig,
    directory: Arc<dyn TpaDirectory>,
    active: Arc<AtomicUsize>,
    next_instance: AtomicU64,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new(config: SessionConfig, directory: Arc<dyn TpaDirectory>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            directory,
            active: Arc::new(AtomicUsize::new(0)),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Live-session counter shared with the health monitor.
    pub fn active_counter(&self) -> Arc<AtomicUsize> {
        self.active.clone()
    }

    /// Number of running session actors.
    pub fn count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Handle for a running session.
    pub fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|h| h.clone())
            .filter(|h| !h.is_closed())
    }

    /// Ids of registered sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Bind an authenticated glasses socket to the user's session,
    /// creating the session if needed.
    pub async fn attach_glasses(
        self: &Arc<Self>,
        user: &AuthenticatedUser,
        connection: Arc<ClientConnection>,
    ) -> Result<SessionHandle> {
        // A session that finished between lookup and send is replaced once.
        for _ in 0..2 {
            let handle = self.get_or_spawn(user);
            let command = SessionCommand::GlassesConnected {
                connection: connection.clone(),
            };
            if handle.send(command).await.is_ok() {
                return Ok(handle);
            }
            let instance = handle.instance();
            let _ = self
                .sessions
                .remove_if(&user.session_id, |_, h| h.instance() == instance);
        }
        Err(RelayError::SessionClosed(user.session_id.to_string()))
    }

    /// Tear down every session and wait for the actors to exit.
    pub async fn shutdown_all(&self, reason: &str) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), reason, "shutting down all sessions");
        let _ = futures::future::join_all(handles.iter().map(|h| async move {
            let _ = h.shutdown(reason).await;
            h.closed().await;
        }))
        .await;
    }

    fn get_or_spawn(self: &Arc<Self>, user: &AuthenticatedUser) -> SessionHandle {
        match self.sessions.entry(user.session_id.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            entry => {
                let handle = self.spawn(user);
                let _ = entry.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn(self: &Arc<Self>, user: &AuthenticatedUser) -> SessionHandle {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.command_queue_capacity.max(1));
        let actor = SessionActor::new(
            user.session_id.clone(),
            user.user_id.clone(),
            self.directory.system_app(&user.user_id),
            &self.config,
            &tx,
        );
        let handle = SessionHandle::new(user.session_id.clone(), user.user_id.clone(), instance, tx);

        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        set_active_gauge(active);
        info!(session_id = %user.session_id, user_id = %user.user_id, instance, "session created");

        let registry: Weak<Self> = Arc::downgrade(self);
        let session_id = user.session_id.clone();
        drop(tokio::spawn(async move {
            actor.run(rx).await;
            if let Some(registry) = registry.upgrade() {
                registry.on_session_ended(&session_id, instance);
            }
        }));
        handle
    }

    fn on_session_ended(&self, session_id: &SessionId, instance: u64) {
        let removed = self
            .sessions
            .remove_if(session_id, |_, h| h.instance() == instance)
            .is_some();
        let active = self.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        set_active_gauge(active);
        debug!(%session_id, instance, removed, active, "session actor exited");
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_active_gauge(active: usize) {
    gauge!(SESSIONS_ACTIVE).set(active as f64);
}
