//! `ParleyServer`: axum router and listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use parley_core::ids::UserId;

use crate::auth::Authenticator;
use crate::health::{self, HealthResponse};
use crate::hub::HubHandle;
use crate::settings::ServerSettings;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::upgrade::ws_handler;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub auth: Arc<dyn Authenticator>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
    pub max_message_size: usize,
}

pub struct ParleyServer {
    settings: ServerSettings,
    hub: HubHandle,
    auth: Arc<dyn Authenticator>,
    metrics: Option<PrometheusHandle>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
}

impl ParleyServer {
    pub fn new(
        settings: ServerSettings,
        hub: HubHandle,
        auth: Arc<dyn Authenticator>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            settings,
            hub,
            auth,
            metrics: None,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            auth: self.auth.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.settings.max_message_size,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/presence", get(presence_list_handler))
            .route("/presence/{user_id}", get(presence_user_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in a background task until shutdown is triggered.
    /// Returns the bound address, which matters when the port is `0`.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "parley server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server terminated with error");
            }
            info!("parley server stopped");
        });
        Ok((local_addr, handle))
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }
}

#[derive(Debug, Serialize)]
struct PresenceList {
    online: Vec<UserId>,
}

#[derive(Debug, Serialize)]
struct UserPresence {
    user_id: UserId,
    online: bool,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.hub.online_count()))
}

/// GET /presence
async fn presence_list_handler(State(state): State<AppState>) -> Json<PresenceList> {
    Json(PresenceList {
        online: state.hub.online_user_ids(),
    })
}

/// GET /presence/{user_id}
async fn presence_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<UserPresence> {
    Json(UserPresence {
        user_id,
        online: state.hub.is_online(user_id),
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
