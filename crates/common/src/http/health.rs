//! HTTP server for liveness, readiness, and worker counters.
//!
//! Every long-running worker exposes:
//! - `GET /health` — `{status, running, uptime_seconds}`; 200 while the
//!   process is alive, `running: false` once shutdown has begun
//! - `GET /ready` — 200 once connections are established, 503 before
//! - `GET /stats` — the worker's counter snapshot, read-only

use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Read-only counter snapshot a worker exposes on `/stats`.
pub trait StatsProvider: Send + Sync {
    fn snapshot(&self) -> serde_json::Value;
}

pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<AppState>,
}

struct AppState {
    started_at: Instant,
    ready: Arc<AtomicBool>,
    shutdown: CancellationToken,
    stats: Arc<dyn StatsProvider>,
}

impl HealthServer {
    pub fn new(
        addr: SocketAddr,
        ready: Arc<AtomicBool>,
        shutdown: CancellationToken,
        stats: Arc<dyn StatsProvider>,
    ) -> Self {
        Self {
            addr,
            state: Arc::new(AppState {
                started_at: Instant::now(),
                ready,
                shutdown,
                stats,
            }),
        }
    }

    /// Serve until the shutdown token fires.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .context("failed to bind health server")?;
        info!(addr = %self.addr, "health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("health server failed")
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "running": !state.shutdown.is_cancelled(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> Response {
    if state.ready.load(Ordering::SeqCst) {
        "READY".into_response()
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStats;

    impl StatsProvider for FixedStats {
        fn snapshot(&self) -> serde_json::Value {
            serde_json::json!({"events_received": 7})
        }
    }

    fn test_state(ready: bool, shutdown: CancellationToken) -> Arc<AppState> {
        Arc::new(AppState {
            started_at: Instant::now(),
            ready: Arc::new(AtomicBool::new(ready)),
            shutdown,
            stats: Arc::new(FixedStats),
        })
    }

    #[tokio::test]
    async fn health_reports_running_until_shutdown() {
        let token = CancellationToken::new();
        let state = test_state(true, token.clone());

        let Json(body) = health_handler(State(state.clone())).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["running"], true);

        token.cancel();
        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn ready_returns_503_before_connections_established() {
        let state = test_state(false, CancellationToken::new());
        let response = ready_handler(State(state)).await;
        assert_eq!(
            response.status(),
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn ready_returns_200_once_ready() {
        let state = test_state(true, CancellationToken::new());
        let response = ready_handler(State(state)).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_returns_the_provider_snapshot() {
        let state = test_state(true, CancellationToken::new());
        let Json(body) = stats_handler(State(state)).await;
        assert_eq!(body["events_received"], 7);
    }
}
