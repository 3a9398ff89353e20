//! Socket pump shared by the glasses and TPA gateways.
//!
//! Splits an upgraded socket into a writer task fed by the connection's
//! outbound channel and a reader the gateway pulls text frames from. Every
//! inbound frame counts as activity for the health monitor. The reader ends
//! with a [`Disconnect`] telling the session whether to wait for a reconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::connection::{ClientConnection, Disconnect, Outbound};
use super::monitor::HealthMonitor;

/// How long [`SocketPump::finish`] waits for queued frames to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Reader half of an upgraded socket plus its writer task.
pub struct SocketPump {
    rx: SplitStream<WebSocket>,
    connection: Arc<ClientConnection>,
    monitor: Arc<HealthMonitor>,
    writer: JoinHandle<()>,
}

impl SocketPump {
    /// Split `ws` and spawn the writer task draining `outbound`.
    pub fn start(
        ws: WebSocket,
        connection: Arc<ClientConnection>,
        mut outbound: mpsc::Receiver<Outbound>,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        let (mut ws_tx, rx) = ws.split();
        let writer_conn = connection.clone();
        let writer = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    frame = outbound.recv() => frame,
                    () = writer_conn.closed() => None,
                };
                let Some(frame) = frame else { break };
                let (message, last) = match frame {
                    Outbound::Text(text) => (Message::Text(text.as_str().into()), false),
                    Outbound::Ping => (Message::Ping(vec![].into()), false),
                    Outbound::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };
                if ws_tx.send(message).await.is_err() || last {
                    break;
                }
            }
            // Drain whatever was queued before a forced close.
            while let Ok(Outbound::Text(text)) = outbound.try_recv() {
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    break;
                }
            }
        });

        Self {
            rx,
            connection,
            monitor,
            writer,
        }
    }

    /// The connection this pump serves.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Next inbound text frame, or why the socket ended.
    pub async fn next_text(&mut self) -> Result<String, Disconnect> {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.connection.closed() => {
                    return Err(self
                        .connection
                        .close_reason()
                        .unwrap_or_else(|| Disconnect::transient("connection closed")));
                }
                frame = self.rx.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = self.monitor.record_activity(&self.connection.id);
                    return Ok(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = self.monitor.record_activity(&self.connection.id);
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Ok(text),
                        Err(_) => {
                            debug!(conn_id = %self.connection.id, len = data.len(), "ignoring non-UTF8 binary frame");
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    let _ = self.monitor.record_activity(&self.connection.id);
                }
                Some(Ok(Message::Close(frame))) => return Err(classify_close(frame.as_ref())),
                Some(Err(e)) => return Err(Disconnect::transient(format!("transport error: {e}"))),
                None => return Err(Disconnect::transient("connection lost")),
            }
        }
    }

    /// Wait briefly for queued frames to flush, then drop the socket.
    pub async fn finish(mut self) {
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut self.writer).await.is_err() {
            self.writer.abort();
        }
    }

    /// Queue a close handshake, then [`finish`](Self::finish).
    pub async fn close(self, code: u16, reason: &str) {
        let _ = self.connection.send_close(code, reason);
        self.finish().await;
    }
}

/// Map a peer close frame to a disconnect kind.
///
/// Only a normal closure (1000) means the peer is gone for good.
pub fn classify_close(frame: Option<&CloseFrame>) -> Disconnect {
    match frame {
        Some(f) if f.code == close_code::NORMAL => {
            Disconnect::permanent(format!("closed by peer: {}", f.reason.as_str()))
        }
        Some(f) => Disconnect::transient(format!("close code {}", f.code)),
        None => Disconnect::transient("closed without status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: u16, reason: &str) -> CloseFrame {
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }

    #[test]
    fn normal_close_is_permanent() {
        let d = classify_close(Some(&frame(close_code::NORMAL, "bye")));
        assert!(d.is_permanent());
        assert!(d.reason().contains("bye"));
    }

    #[test]
    fn abnormal_close_is_transient() {
        assert!(!classify_close(Some(&frame(close_code::AWAY, ""))).is_permanent());
        assert!(!classify_close(Some(&frame(1011, "internal"))).is_permanent());
    }

    #[test]
    fn close_without_status_is_transient() {
        assert!(!classify_close(None).is_permanent());
    }
}
