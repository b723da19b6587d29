//! Event history endpoints.

use axum::extract::{Query, State};
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use herald_core::event::DomainEvent;
use herald_core::store::EventFilter;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Query string for GET /events.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Only this event type.
    pub event_type: Option<String>,
    /// Only this aggregate.
    pub aggregate_id: Option<String>,
    /// Recorded at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Recorded strictly before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Position cursor from a previous page.
    pub after_position: Option<i64>,
    /// Page size, capped at 1000.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn into_filter(self) -> EventFilter {
        EventFilter {
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            since: self.since,
            until: self.until,
            after_position: self.after_position,
            limit: clamp_limit(self.limit),
        }
    }
}

/// Query string for GET /events/unprocessed.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    /// Page size, capped at 1000.
    pub limit: Option<usize>,
}

/// Response body listing events.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Matching events in insertion order.
    pub events: Vec<DomainEvent>,
    /// Cursor for the next page, absent when the page was not full.
    pub next_position: Option<i64>,
}

impl EventsResponse {
    fn page(events: Vec<DomainEvent>, limit: usize) -> Self {
        let next_position = if events.len() == limit {
            events.last().and_then(DomainEvent::position)
        } else {
            None
        };
        Self {
            events,
            next_position,
        }
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// GET /events
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let filter = query.into_filter();
    let events = state.coordinator.get_history(&filter).await?;
    Ok(Json(EventsResponse::page(events, filter.limit)))
}

/// GET /events/unprocessed
#[instrument(skip(state))]
async fn list_unprocessed(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let limit = clamp_limit(query.limit);
    let events = state.coordinator.get_unprocessed(limit).await?;
    Ok(Json(EventsResponse {
        events,
        next_position: None,
    }))
}

/// Returns the event history router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/unprocessed", get(list_unprocessed))
}
