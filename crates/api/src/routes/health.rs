//! Health and metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Outbox entries not yet published; absent when the store is down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_pending: Option<u64>,
}

/// GET /health: reports whether the write store answers.
pub async fn check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.outbox.pending_count().await {
        Ok(pending) => {
            metrics::gauge!("outbox_pending_entries").set(pending as f64);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ok",
                    outbox_pending: Some(pending),
                }),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "health check: write store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    outbox_pending: None,
                }),
            )
        }
    }
}

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render())
}
