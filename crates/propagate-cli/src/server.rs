//! Minimal health/status HTTP surface for the background reconcile loop.
//! Grounded on `healer/src/ci/server.rs`'s `ServerState`/`build_router`/
//! `run_server` shape — trimmed to the two read-only endpoints this
//! engine's daemon mode needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use propagate_core::Reconciler;
use serde::Serialize;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub reconciler: Arc<Reconciler>,
    sweeps: AtomicU64,
    jobs_reconciled: AtomicU64,
}

impl ServerState {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler, sweeps: AtomicU64::new(0), jobs_reconciled: AtomicU64::new(0) }
    }

    pub fn record_sweep(&self, jobs_seen: usize) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.jobs_reconciled.fetch_add(jobs_seen as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    sweeps_completed: u64,
    jobs_reconciled: u64,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        sweeps_completed: state.sweeps.load(Ordering::Relaxed),
        jobs_reconciled: state.jobs_reconciled.load(Ordering::Relaxed),
    })
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: Arc<ServerState>, addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "propagation engine status server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
