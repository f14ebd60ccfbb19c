use crate::error::{ControllerError, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Readiness flag shared between the controller and the health server
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

/// Liveness and readiness probes for the controller process
pub struct HealthServer {
    config: HealthConfig,
    readiness: Readiness,
}

impl HealthServer {
    pub fn new(config: HealthConfig, readiness: Readiness) -> Self {
        Self { config, readiness }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.readiness.clone())
    }

    /// Serve until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let app = self.build_router();

        info!("Starting health server on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                ControllerError::internal_error(format!(
                    "Failed to bind health server to {}: {}",
                    self.config.listen_addr, e
                ))
            })?;

        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
            .map_err(|e| ControllerError::internal_error(format!("Health server failed: {}", e)))
    }
}

/// Health check endpoint
async fn healthz() -> &'static str {
    "ok"
}

/// Liveness probe
async fn livez() -> &'static str {
    "ok"
}

/// Readiness probe: ok once the reconcile workers are running
async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
