//! Liveness and coordinator status endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use herald_core::status::CoordinatorStatus;
use serde::Serialize;
use tracing::instrument;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
///
/// Responds 503 while the coordinator is not ready or a backend is
/// unhealthy; the body is the same snapshot either way.
#[instrument(skip(state))]
async fn coordinator_status(
    State(state): State<AppState>,
) -> (StatusCode, Json<CoordinatorStatus>) {
    let status = state.coordinator.status().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Returns the health and status router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(coordinator_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use herald_bus::{CoordinatorConfig, EventDrivenCoordinator, StaticBackends};
    use herald_event_store::InMemoryEventStore;
    use herald_test_support::{FailingEventStore, RecordingPublisher};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn coordinator_with(store: Arc<dyn herald_core::store::EventStore>) -> Arc<EventDrivenCoordinator> {
        Arc::new(EventDrivenCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(StaticBackends::new(
                store,
                Arc::new(RecordingPublisher::new("node-a")),
            )),
        ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_returns_200_with_version() {
        let coordinator = coordinator_with(Arc::new(InMemoryEventStore::new()));
        let app = router().with_state(AppState::new(coordinator));

        let (status, json) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_status_returns_200_when_ready() {
        // Arrange
        let coordinator = coordinator_with(Arc::new(InMemoryEventStore::new()));
        coordinator.start().await.unwrap();
        let app = router().with_state(AppState::new(coordinator));

        // Act
        let (status, json) = get(app, "/status").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "ready");
        assert!(json["node_id"].as_str().unwrap().starts_with("herald-"));
        assert!(json["instance_id"].is_string());
    }

    #[tokio::test]
    async fn test_status_returns_503_before_start() {
        let coordinator = coordinator_with(Arc::new(InMemoryEventStore::new()));
        let app = router().with_state(AppState::new(coordinator));

        let (status, json) = get(app, "/status").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["state"], "uninitialized");
    }

    #[tokio::test]
    async fn test_status_returns_503_when_store_unreachable() {
        let coordinator = coordinator_with(Arc::new(FailingEventStore));
        coordinator.start().await.unwrap();
        let app = router().with_state(AppState::new(coordinator));

        let (status, json) = get(app, "/status").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["store"]["status"], "unhealthy");
    }
}
