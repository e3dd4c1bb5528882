//! API route table
//!
//! - /api/v1/health - liveness and counts
//! - /api/v1/status - models, satellites, event counters, queue depth
//! - /api/v1/predictions - recently served predictions
//! - /api/v1/predictions/:satellite_id - forecast for one satellite
//! - /api/v1/models/*key - one published model state

use axum::routing::get;
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/predictions", get(handlers::recent_predictions))
        .route("/predictions/:satellite_id", get(handlers::prediction))
        .route("/models/*key", get(handlers::model))
        .with_state(state)
}
