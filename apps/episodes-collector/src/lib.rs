//! Episodes collector - receives timing beacons from instrumented pages
//!
//! Provides endpoints for:
//! - Beacon intake (`GET /beacon?ets=...`)
//! - Per-episode summaries (`GET /api/episodes`)
//! - Health check

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;
pub mod state;
pub mod stats;

pub use error::CollectorError;
pub use state::AppState;

/// Build the collector router
pub fn router(state: Arc<AppState>) -> Router {
    // Beacons arrive cross-origin from instrumented sites
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/beacon", get(handlers::beacon))
        .route("/api/episodes", get(handlers::list_episodes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
