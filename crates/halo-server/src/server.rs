//! HTTP/WebSocket server: routes, shared state, and the listen loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::HealthResponse;
use crate::services::{Authenticator, TpaDirectory};
use crate::session::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::glasses::run_glasses_socket;
use crate::websocket::monitor::HealthMonitor;
use crate::websocket::tpa::run_tpa_socket;

/// Shared state handed to every handler and socket task.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Connection health monitor.
    pub monitor: Arc<HealthMonitor>,
    /// Credential checks.
    pub authenticator: Arc<dyn Authenticator>,
    /// Process-wide shutdown signal.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: ServerConfig,
    /// When the server was built.
    pub start_time: Instant,
    /// Prometheus renderer, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Build a server around the given collaborators.
    pub fn new(
        config: ServerConfig,
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn TpaDirectory>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session, directory));
        let monitor = Arc::new(HealthMonitor::new(config.monitor, registry.active_counter()));
        Self {
            state: AppState {
                registry,
                monitor,
                authenticator,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config,
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from this recorder.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Axum router with every route.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/glasses-ws", get(glasses_ws_handler))
            .route("/tpa-ws", get(tpa_ws_handler))
            .with_state(Arc::new(self.state.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the health monitor, and serve until shutdown.
    ///
    /// Shutdown tears down every session before the listener stops.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;

        let token = self.state.shutdown.token();
        let monitor = tokio::spawn(self.state.monitor.clone().run(token.clone()));
        let registry = self.state.registry.clone();
        let app = self.router();

        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                registry.shutdown_all("server shutting down").await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
                error!(error = %e, "server error");
            }
            let _ = monitor.await;
        });

        info!(%addr, "relay listening");
        Ok((addr, handle))
    }

    /// Live sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Connection health monitor.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.state.monitor
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let health = HealthResponse::new(
        state.start_time,
        state.monitor.stats(),
        state.shutdown.is_shutting_down(),
    );
    let status = if health.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn glasses_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_glasses_socket(socket, state))
}

async fn tpa_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_tpa_socket(socket, state))
}
