//! HTTP exposure of pipeline counters and window state.
//!
//! - `GET /health` liveness
//! - `GET /stats` counter snapshot
//! - `POST /stats/reset` zero every counter
//! - `GET /windows/{key}?from=&to=` windows of `key` overlapping `[from, to)`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use kurier_core::{AggregateWindow, PipelineStats, StatsSnapshot};

use crate::window::WindowedAggregator;

#[derive(Clone)]
pub struct StatsState {
    pub stats: Arc<PipelineStats>,
    pub windows: Arc<WindowedAggregator>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct WindowRange {
    #[serde(default = "i64_min")]
    pub from: i64,
    #[serde(default = "i64_max")]
    pub to: i64,
}

fn i64_min() -> i64 {
    i64::MIN
}

fn i64_max() -> i64 {
    i64::MAX
}

pub fn stats_router(state: StatsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/stats/reset", post(reset))
        .route("/windows/{key}", get(windows))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stats(State(state): State<StatsState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

async fn reset(State(state): State<StatsState>) -> Json<StatsSnapshot> {
    state.stats.reset();
    tracing::info!("pipeline stats reset");
    Json(state.stats.snapshot())
}

async fn windows(
    State(state): State<StatsState>,
    Path(key): Path<String>,
    Query(range): Query<WindowRange>,
) -> Json<Vec<AggregateWindow>> {
    Json(state.windows.snapshot(&key, range.from, range.to))
}

/// Serve on an already-bound listener until `shutdown` flips to true.
pub async fn serve_stats(
    listener: TcpListener,
    state: StatsState,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, stats_router(state))
        .with_graceful_shutdown(async move {
            let mut rx = shutdown;
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

/// Spawn the stats HTTP server on `addr`.
pub fn spawn_stats_server(
    addr: SocketAddr,
    state: StatsState,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "failed to bind stats HTTP server");
                return;
            }
        };

        tracing::info!(%addr, "stats HTTP server listening");
        if let Err(e) = serve_stats(listener, state, shutdown).await {
            tracing::error!(error = %e, "stats HTTP server failed");
        }
        tracing::info!("stats HTTP server stopped");
    })
}
