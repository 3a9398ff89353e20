//! Glasses gateway.
//!
//! The first frame must be `connection_init` carrying a core token. Once the
//! token is accepted the socket is handed to the user's session; every later
//! frame is forwarded to that session until the socket ends.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, close_code};
use halo_core::RelayError;
use halo_core::errors::Result;
use halo_core::messages::{CloudToGlasses, GlassesToCloud};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use super::connection::{ClientConnection, ConnectionRole, Disconnect};
use super::handler::{SocketLifetime, parse_glasses, reject_frame};
use super::socket::SocketPump;
use crate::server::AppState;
use crate::session::{SessionCommand, SessionHandle};

/// Serve one glasses socket from upgrade to close.
#[instrument(skip_all, fields(conn_id))]
pub async fn run_glasses_socket(ws: WebSocket, state: Arc<AppState>) {
    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(ConnectionRole::Glasses, tx));
    let _ = tracing::Span::current().record("conn_id", connection.id.as_str());
    let lifetime = SocketLifetime::open(&connection, &state.monitor);
    let mut pump = SocketPump::start(ws, connection.clone(), rx, state.monitor.clone());

    let text = match pump.next_text().await {
        Ok(text) => text,
        Err(disconnect) => {
            lifetime.close(&disconnect);
            pump.finish().await;
            return;
        }
    };

    let session = match bind(&text, &connection, &state).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "glasses handshake rejected");
            let reply = match &e {
                RelayError::Authentication(_) => CloudToGlasses::AuthError {
                    message: e.to_string(),
                },
                _ => CloudToGlasses::ConnectionError {
                    message: e.to_string(),
                },
            };
            let _ = connection.send_json(&reply);
            lifetime.close(&Disconnect::permanent(e.code()));
            pump.close(close_code::POLICY, e.code()).await;
            return;
        }
    };
    info!(session_id = %session.session_id(), "glasses bound to session");

    let disconnect = loop {
        match pump.next_text().await {
            Ok(text) => match parse_glasses(&text) {
                Ok(message) => {
                    let command = SessionCommand::GlassesMessage {
                        connection_id: connection.id.clone(),
                        message,
                    };
                    if session.send(command).await.is_err() {
                        let ended = Disconnect::permanent("session ended");
                        let _ = connection.force_close(ended.clone());
                        break ended;
                    }
                }
                Err(e) => reject_frame(&connection, &e),
            },
            Err(disconnect) => break disconnect,
        }
    };

    let _ = session
        .send(SessionCommand::GlassesDisconnected {
            connection_id: connection.id.clone(),
            disconnect: disconnect.clone(),
        })
        .await;
    lifetime.close(&disconnect);
    pump.finish().await;
}

async fn bind(
    text: &str,
    connection: &Arc<ClientConnection>,
    state: &AppState,
) -> Result<SessionHandle> {
    let core_token = match parse_glasses(text)? {
        GlassesToCloud::ConnectionInit { core_token } => core_token,
        other => {
            return Err(RelayError::Protocol(format!(
                "expected connection_init, got {}",
                other.kind()
            )));
        }
    };
    let user = state.authenticator.authenticate_glasses(&core_token)?;
    state.registry.attach_glasses(&user, connection.clone()).await
}
