//! HTTP server: router, status endpoints, lifecycle.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::coordinator::CallCoordinator;
use crate::push::{PushService, PushSubscription, WakeChannel};
use crate::websocket::handle_socket;

/// Server startup and serving errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The configured address.
        addr: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    coordinator: Arc<CallCoordinator>,
    push: Option<PushService>,
    started_at: Instant,
}

/// The relay server: an Axum router over a single [`CallCoordinator`].
pub struct RelayServer {
    config: ServerConfig,
    coordinator: Arc<CallCoordinator>,
    push: Option<PushService>,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Assemble the server. Push is optional; without it the relay runs
    /// connection-only.
    #[must_use]
    pub fn new(config: ServerConfig, push: Option<PushService>) -> Self {
        let wake = push
            .clone()
            .map(|p| Arc::new(p) as Arc<dyn WakeChannel>);
        let coordinator = Arc::new(CallCoordinator::new(
            config.ring_timeout(),
            config.call_retention(),
            wake,
        ));
        Self {
            config,
            coordinator,
            push,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the accept loop and the retention sweeper when
    /// cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The coordinator backing this server.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<CallCoordinator> {
        &self.coordinator
    }

    /// Build the router. Exposed separately so tests can drive it without
    /// a listener.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: Arc::clone(&self.coordinator),
            push: self.push.clone(),
            started_at: Instant::now(),
        };
        Router::new()
            .route("/health", get(health))
            .route("/stats", get(stats))
            .route("/ws", get(ws_upgrade))
            .route("/push/public-key", get(push_public_key))
            .route("/push/subscribe", post(push_subscribe))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "relay server listening");
        }

        let sweeper = {
            let coordinator = Arc::clone(&self.coordinator);
            let interval = self.config.prune_interval();
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = ticker.tick() => coordinator.prune_expired(),
                        () = token.cancelled() => break,
                    }
                }
            })
        };

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(ServerError::Serve);

        sweeper.abort();
        info!("relay server stopped");
        result
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    #[serde(flatten)]
    stats: crate::coordinator::RelayStats,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        stats: state.coordinator.stats(),
    })
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.stats())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    /// `null` when push is not configured.
    public_key: Option<String>,
}

async fn push_public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: state.push.map(|p| p.public_key().to_owned()),
    })
}

async fn push_subscribe(
    State(state): State<AppState>,
    Json(subscription): Json<PushSubscription>,
) -> impl IntoResponse {
    match state.push {
        Some(push) => {
            push.set_subscription(subscription);
            StatusCode::NO_CONTENT.into_response()
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, "push not configured").into_response(),
    }
}
