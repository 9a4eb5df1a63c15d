//! HTTP endpoint exposing Prometheus metrics and a status snapshot.

use crate::metrics::MetricsRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use balancer::{Backend, BackendSnapshot};
use prometheus_client::encoding::text::encode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    metrics: Arc<MetricsRegistry>,
    backends: Arc<Vec<Arc<Backend>>>,
}

/// HTTP server for the /metrics and /status endpoints.
pub struct StatusServer {
    metrics: Arc<MetricsRegistry>,
    backends: Arc<Vec<Arc<Backend>>>,
    listen_addr: String,
}

impl StatusServer {
    pub fn new(
        metrics: Arc<MetricsRegistry>,
        backends: Vec<Arc<Backend>>,
        listen_addr: String,
    ) -> Self {
        Self { metrics, backends: Arc::new(backends), listen_addr }
    }

    /// Run the HTTP server until the process exits.
    pub async fn run(self) -> common::Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/status", get(status_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(AppState { metrics: self.metrics, backends: self.backends });

        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(listen_addr = %self.listen_addr, "status server listening");

        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state.metrics.registry) {
        warn!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

/// JSON snapshot of every backend and server.
async fn status_handler(State(state): State<AppState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.backends.iter().map(|backend| backend.snapshot()).collect())
}
