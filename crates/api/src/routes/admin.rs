//! Operational endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use projections::ProjectionRebuilder;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct DrainResponse {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
    pub unmarked: usize,
    pub pending: u64,
}

/// POST /admin/outbox/drain: runs one drain cycle now and reports it.
#[tracing::instrument(skip(state))]
pub async fn drain_outbox(State(state): State<Arc<AppState>>) -> Result<Json<DrainResponse>, ApiError> {
    let report = state.publisher.drain_once().await?;
    let pending = state
        .outbox
        .pending_count()
        .await
        .map_err(publisher::PublisherError::from)?;

    Ok(Json(DrainResponse {
        fetched: report.fetched,
        published: report.published,
        failed: report.failed,
        unmarked: report.unmarked,
        pending,
    }))
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub events: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// POST /admin/read-model/rebuild: clears the read model and replays the
/// write-side event log into it.
#[tracing::instrument(skip(state))]
pub async fn rebuild_read_model(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RebuildResponse>, ApiError> {
    let rebuilder = ProjectionRebuilder::new(
        Arc::clone(state.orders.handler().store()),
        Arc::clone(&state.read_models),
    );
    let report = rebuilder.rebuild().await?;

    Ok(Json(RebuildResponse {
        events: report.events,
        applied: report.applied,
        duplicates: report.duplicates,
        skipped: report.skipped,
        failed: report.failed,
    }))
}
