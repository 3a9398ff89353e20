//! TPA gateway.
//!
//! The first frame must be `tpa_connection_init` naming a package, a live
//! session, and an API key. Every later frame is forwarded to that session
//! tagged with the authenticated package; the session checks that the
//! frame's claimed identity matches.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, close_code};
use halo_core::RelayError;
use halo_core::errors::Result;
use halo_core::messages::{CloudToTpa, TpaToCloud};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use super::connection::{ClientConnection, ConnectionRole, Disconnect};
use super::handler::{SocketLifetime, parse_tpa, reject_frame};
use super::socket::SocketPump;
use crate::server::AppState;
use crate::session::{SessionCommand, SessionHandle};

/// Serve one TPA socket from upgrade to close.
#[instrument(skip_all, fields(conn_id, package_name))]
pub async fn run_tpa_socket(ws: WebSocket, state: Arc<AppState>) {
    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(ConnectionRole::Tpa, tx));
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

    let (session, package_name) = match bind(&text, &connection, &state).await {
        Ok(bound) => bound,
        Err(e) => {
            warn!(error = %e, "tpa handshake rejected");
            let _ = connection.send_json(&CloudToTpa::ConnectionError {
                code: e.code().to_string(),
                message: e.to_string(),
            });
            lifetime.close(&Disconnect::permanent(e.code()));
            pump.close(close_code::POLICY, e.code()).await;
            return;
        }
    };
    let _ = tracing::Span::current().record("package_name", package_name.as_str());
    info!(session_id = %session.session_id(), "tpa bound to session");

    let disconnect = loop {
        match pump.next_text().await {
            Ok(text) => match parse_tpa(&text) {
                Ok(message) => {
                    let command = SessionCommand::TpaMessage {
                        package_name: package_name.clone(),
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
        .send(SessionCommand::TpaDisconnected {
            package_name,
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
) -> Result<(SessionHandle, String)> {
    let (package_name, session_id, api_key) = match parse_tpa(text)? {
        TpaToCloud::ConnectionInit {
            package_name,
            session_id,
            api_key,
        } => (package_name, session_id, api_key),
        other => {
            return Err(RelayError::Protocol(format!(
                "expected tpa_connection_init, got {}",
                other.kind()
            )));
        }
    };
    state
        .authenticator
        .authenticate_tpa(&package_name, &session_id, &api_key)?;
    let session = state
        .registry
        .get(&session_id)
        .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))?;
    session
        .send(SessionCommand::TpaConnected {
            package_name: package_name.clone(),
            connection: connection.clone(),
        })
        .await?;
    Ok((session, package_name))
}
