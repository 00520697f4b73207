//! Health and Prometheus metrics.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{OutboxStats, OutboxStore};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `"degraded"` while anything waits on an operator.
    pub status: &'static str,
    pub outbox: OutboxStats,
    pub compensation_failures: usize,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let outbox = state.outbox.stats().await?;
    let compensation_failures = state.orchestrator.compensation_failures().await?.len();
    let status = if outbox.unresolved_dead_letters > 0 || compensation_failures > 0 {
        "degraded"
    } else {
        "ok"
    };
    Ok(Json(HealthResponse {
        status,
        outbox,
        compensation_failures,
    }))
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
