//! Replay and redelivery endpoints.

use axum::extract::State;
use axum::{Json, Router, routing::post};
use herald_bus::{RedeliveryReport, ReplayReport, ReplayRequest};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_REDELIVERY_LIMIT: usize = 100;

/// Request body for POST /redeliver.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RedeliverRequest {
    /// Maximum number of events to redeliver.
    pub limit: Option<usize>,
}

/// POST /replay
#[instrument(skip(state, request), fields(start = %request.start, end = %request.end))]
async fn replay(
    State(state): State<AppState>,
    Json(request): Json<ReplayRequest>,
) -> Result<Json<ReplayReport>, ApiError> {
    let report = state.coordinator.replay(&request).await?;
    info!(events = report.events, "replay requested by operator");
    Ok(Json(report))
}

/// POST /redeliver
#[instrument(skip(state, request))]
async fn redeliver(
    State(state): State<AppState>,
    Json(request): Json<RedeliverRequest>,
) -> Result<Json<RedeliveryReport>, ApiError> {
    let limit = request.limit.unwrap_or(DEFAULT_REDELIVERY_LIMIT).max(1);
    let report = state.coordinator.redeliver_unprocessed(limit).await?;
    Ok(Json(report))
}

/// Returns the recovery router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/replay", post(replay))
        .route("/redeliver", post(redeliver))
}
