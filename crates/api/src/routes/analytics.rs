//! Reporting over the order read model.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use projections::{AnalyticsPeriod, OrderAnalytics};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    pub period: Option<String>,
}

#[derive(Serialize)]
pub struct AnalyticsResponse {
    pub period: AnalyticsPeriod,
    #[serde(flatten)]
    pub analytics: OrderAnalytics,
}

/// GET /analytics?period=daily|weekly|monthly|all (default monthly)
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let period = match params.period.as_deref() {
        None => AnalyticsPeriod::default(),
        Some(raw) => raw
            .parse::<AnalyticsPeriod>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };

    let analytics = state.read_models.analytics(period).await?;
    Ok(Json(AnalyticsResponse { period, analytics }))
}
