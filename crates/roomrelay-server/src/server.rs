//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use roomrelay_settings::{RelaySettings, SessionSettings};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::registry::RoomRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::types::ConnectionId;
use crate::websocket::ChatSession;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms and their members.
    pub registry: Arc<RoomRegistry>,
    /// Per-connection settings handed to each session.
    pub session: SessionSettings,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for rendering metrics.
    pub metrics: PrometheusHandle,
}

/// The room chat relay server.
pub struct RelayServer {
    settings: RelaySettings,
    registry: Arc<RoomRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(settings: RelaySettings, metrics: PrometheusHandle) -> Self {
        Self {
            settings,
            registry: Arc::new(RoomRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            session: self.settings.session.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };
        let static_dir = &self.settings.server.static_dir;

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route_service("/", ServeFile::new(static_dir.join("index.html")))
            .route_service("/host", ServeFile::new(static_dir.join("host.html")))
            .nest_service("/static", ServeDir::new(static_dir))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown is signalled.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let host = self.settings.server.host.as_str();
        let port = self.settings.server.port;
        let bind_error = |source| ServerError::Bind {
            addr: format!("{host}:{port}"),
            source,
        };
        let listener = TcpListener::bind((host, port)).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(%addr, static_dir = %self.settings.server.static_dir.display(), "relay listening");
        Ok((addr, handle))
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }
}

/// GET /ws: upgrade and hand the socket to a new chat session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let session = ChatSession::new(
        ConnectionId::new(),
        state.registry.clone(),
        state.session.clone(),
        state.shutdown.token(),
    );
    let shutdown = state.shutdown.clone();
    ws.max_message_size(state.session.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let _ = shutdown.track(session.run(socket)).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.room_count(),
        state.registry.connection_count(),
    ))
}

/// GET /metrics: Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
