//! Herald server error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_bus::ConfigError;
use herald_core::error::EventError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the host process.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or migration error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// The coordinator could not start.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] EventError),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `EventError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub EventError);

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            EventError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            EventError::Vetoed { .. } => (StatusCode::BAD_REQUEST, "vetoed"),
            EventError::NotReady { .. } => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            EventError::EventNotFound(_) => (StatusCode::NOT_FOUND, "event_not_found"),
            EventError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error")
            }
            EventError::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "transport_error"),
            EventError::Handler { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "handler_error"),
        };

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_of(err: EventError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(EventError::Validation("empty event_type".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_veto_maps_to_400() {
        assert_eq!(
            status_of(EventError::Vetoed {
                middleware: "type-filter".into(),
                reason: "blocked".into(),
            }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_not_ready_maps_to_503() {
        assert_eq!(
            status_of(EventError::NotReady {
                state: "stopped".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_event_not_found_maps_to_404() {
        assert_eq!(
            status_of(EventError::EventNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_persistence_maps_to_500() {
        assert_eq!(
            status_of(EventError::Persistence("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_config_error_converts_to_app_error() {
        let err = ConfigError {
            key: "HERALD_REPLAY_BATCH_SIZE",
            value: "zero".into(),
            reason: "not a number".into(),
        };

        let app: AppError = err.into();

        assert!(matches!(app, AppError::Config(ref msg) if msg.contains("HERALD_REPLAY_BATCH_SIZE")));
    }
}
