//! `TaskHubServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use taskhub_auth::TokenVerifier;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api;
use crate::auth::QueryTokenUser;
use crate::config::ServerConfig;
use crate::cors::cors_layer;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::client::Client;
use crate::websocket::connection::AxumConnection;
use crate::websocket::hub::{Hub, HubHandle};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sender side of the broadcast hub.
    pub hub: HubHandle,
    /// Validates tokens on `/ws` and `/api/*`.
    pub verifier: Arc<TokenVerifier>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Max inbound `WebSocket` message size.
    pub max_message_size: usize,
    /// Client pumps, drained on graceful shutdown.
    pub connections: TaskTracker,
}

/// The task hub server.
pub struct TaskHubServer {
    config: ServerConfig,
    hub: HubHandle,
    verifier: Arc<TokenVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl TaskHubServer {
    /// Create a server and spawn its hub loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig, verifier: TokenVerifier) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, handle) = Hub::new(config.hub);
        shutdown.track(tokio::spawn(hub.run(shutdown.token())));
        Self {
            config,
            hub: handle,
            verifier: Arc::new(verifier),
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            verifier: self.verifier.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.config.max_message_size,
            connections: self.shutdown.connections().clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .route("/api/broadcast", post(api::broadcast_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.config.allowed_origins))
    }

    /// Bind and serve in the background until shutdown. Returns the bound address.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        self.shutdown.track(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        }));

        info!(%addr, "taskhub server listening");
        Ok(addr)
    }

    /// Get the hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.hub.client_count()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// GET /ws?token=...
async fn ws_handler(
    QueryTokenUser(identity): QueryTokenUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| accept_socket(socket, identity, state.hub, state.connections))
}

async fn accept_socket(socket: WebSocket, identity: String, hub: HubHandle, connections: TaskTracker) {
    let client = Client::new(hub.clone(), AxumConnection::new(socket), identity);
    if let Err(e) = hub.register_client(client.handle()).await {
        warn!(client_id = %client.id(), error = %e, "hub unavailable, dropping connection");
        return;
    }
    let _ = connections.spawn(client.start().join());
}
