//! # HTTP Server
//!
//! Serves liveness/readiness probes and Prometheus metrics for the
//! controller. Started before the watch loop; readiness flips once the
//! listener is bound.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::observability::metrics;

/// Shared readiness state for the readiness probe
#[derive(Debug)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
}

/// Bind the HTTP server and serve probes and metrics until shutdown
pub async fn start_server(port: u16, state: Arc<ServerState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get({
            let state = Arc::clone(&state);
            move || readyz(Arc::clone(&state))
        }))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP server listening on port {port}");
    state.is_ready.store(true, Ordering::Relaxed);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(state: Arc<ServerState>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather() {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unable to gather metrics: {err}"),
        ),
    }
}
