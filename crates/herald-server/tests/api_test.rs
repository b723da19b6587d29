//! Integration tests for the assembled operator router.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use herald_bus::{CoordinatorConfig, EventDrivenCoordinator, StaticBackends};
use herald_core::clock::SystemClock;
use herald_core::event::{DomainEvent, EventData};
use herald_event_store::InMemoryEventStore;
use herald_server::state::AppState;
use herald_test_support::RecordingPublisher;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn build_test_app() -> (Router, Arc<EventDrivenCoordinator>) {
    let coordinator = Arc::new(EventDrivenCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(StaticBackends::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(RecordingPublisher::new("node-a")),
        )),
    ));
    coordinator.start().await.unwrap();
    let app = herald_server::app(AppState::new(Arc::clone(&coordinator)));
    (app, coordinator)
}

async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}

#[tokio::test]
async fn test_health_returns_200_with_status_ok() {
    let (app, _coordinator) = build_test_app().await;

    let (status, json) = send(app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_history_is_served_under_api_prefix() {
    // Arrange
    let (app, coordinator) = build_test_app().await;
    coordinator
        .publish(DomainEvent::new("U1", "UserRegistered", EventData::new(), &SystemClock))
        .await
        .unwrap();

    // Act
    let (status, json) = send(app, "GET", "/api/v1/events?aggregate_id=U1", None).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["events"].as_array().unwrap().len(), 1);
    assert_eq!(json["events"][0]["processing_status"], "dispatched");
}

#[tokio::test]
async fn test_redeliver_with_nothing_pending_is_empty() {
    let (app, _coordinator) = build_test_app().await;

    let (status, json) = send(app, "POST", "/api/v1/redeliver", Some(serde_json::json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["attempted"], 0);
}

#[tokio::test]
async fn test_routes_return_503_after_shutdown() {
    let (app, coordinator) = build_test_app().await;
    coordinator.shutdown().await;

    let (status, json) = send(app, "GET", "/api/v1/events/unprocessed", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "not_ready");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _coordinator) = build_test_app().await;

    let (status, _) = send(app, "GET", "/api/v1/nonexistent", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
