//! Herald host process: backends, operator HTTP routes and shared state.

pub mod backends;
pub mod error;
pub mod routes;
pub mod state;

use axum::Router;

use crate::state::AppState;

/// Builds the operator router without middleware layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::events::router().merge(routes::recovery::router()))
        .with_state(state)
}
