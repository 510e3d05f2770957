//! Health Check Server - Liveness and Readiness Checks
//!
//! Exposes /live and /ready endpoints via axum 0.7 for container
//! health checks. Readiness means the venue adapter is connected and
//! the ledger has completed a resync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Shared health state polled by readiness checks.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Venue connected and ledger synchronized.
    ready: AtomicBool,
}

impl HealthState {
    /// Create a new health state (not ready until the first resync).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness check: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_until_set() {
        let state = HealthState::new();
        assert!(!state.is_ready());
        state.set_ready(true);
        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn test_readiness_status_codes() {
        let state = Arc::new(HealthState::new());
        let resp = HealthServer::readiness(State(Arc::clone(&state))).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let resp = HealthServer::readiness(State(Arc::clone(&state))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = HealthServer::liveness().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
