//! HTTP surface: WebSocket upgrade, health endpoint, startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use stathub_core::{PendingRequests, Settings};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::IdentityProvider;
use crate::connection::{self, Nodes};
use crate::handlers::HandlerRegistry;

/// Server tuning.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port; 0 picks a free one.
    pub port: u16,
    /// Per-connection outbound queue capacity.
    pub max_send_queue: usize,
    /// Heartbeat ping interval.
    pub heartbeat: Duration,
    /// Per-request reply deadline. Defaults to the environment setting.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8338,
            max_send_queue: 256,
            heartbeat: Duration::from_secs(30),
            request_timeout: Settings::get().request_timeout,
        }
    }
}

/// Shared state behind the routes.
#[derive(Clone)]
pub struct AppState {
    /// Connection roster.
    pub nodes: Arc<Nodes>,
    /// In-flight request registry shared by every connection.
    pub pending: Arc<PendingRequests>,
    /// Frame handlers.
    pub handlers: Arc<HandlerRegistry>,
    /// Tuning the state was built with.
    pub config: ServerConfig,
    /// Start instant, for uptime reporting.
    started_at: Instant,
}

impl AppState {
    /// Fresh state for `config` with `handlers` installed.
    pub fn new(config: ServerConfig, handlers: HandlerRegistry) -> Self {
        Self {
            nodes: Arc::new(Nodes::new()),
            pending: Arc::new(PendingRequests::new(config.request_timeout)),
            handlers: Arc::new(handlers),
            config,
            started_at: Instant::now(),
        }
    }
}

/// Running server: the bound port plus its serving task.
pub struct ServerHandle {
    /// Actually bound port (useful with port 0).
    pub port: u16,
    /// Shared state; usable for issuing hub-side requests to nodes.
    pub state: AppState,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop serving.
    pub fn shutdown(&self) {
        self.server.abort();
    }
}

/// Bind and serve with the built-in protocol handlers.
pub async fn start(
    config: ServerConfig,
    provider: Arc<dyn IdentityProvider>,
) -> std::io::Result<ServerHandle> {
    start_with_handlers(config, HandlerRegistry::with_builtins(provider)).await
}

/// Bind and serve with a custom handler registry.
pub async fn start_with_handlers(
    config: ServerConfig,
    handlers: HandlerRegistry,
) -> std::io::Result<ServerHandle> {
    let state = AppState::new(config, handlers);

    let listener =
        tokio::net::TcpListener::bind((state.config.host.as_str(), state.config.port)).await?;
    let port = listener.local_addr()?.port();

    let router = build_router(state.clone());
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!(%err, "server exited");
        }
    });

    info!(
        port,
        request_timeout_ms = state.config.request_timeout.as_millis() as u64,
        "stathub listening"
    );

    Ok(ServerHandle {
        port,
        state,
        server,
    })
}

/// Build the router serving `/ws` and `/health`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(
            socket,
            peer,
            Arc::clone(&state.nodes),
            Arc::clone(&state.pending),
            Arc::clone(&state.handlers),
            state.config.max_send_queue,
            state.config.heartbeat,
        )
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    uptime_secs: u64,
    connections: usize,
    in_flight_requests: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections: state.nodes.count(),
        in_flight_requests: state.pending.in_flight(),
    })
}
