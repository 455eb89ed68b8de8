//! HTTP handlers for the collector

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    Json,
};
use episodes_core::parse_ets;
use std::sync::Arc;

use crate::error::CollectorError;
use crate::state::AppState;
use crate::stats::EpisodeSummary;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Beacon endpoint: `GET /beacon?ets=name:duration,...`
pub async fn beacon(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, CollectorError> {
    let durations = parse_ets(query.as_deref().unwrap_or(""));
    if durations.is_empty() {
        return Err(CollectorError::EmptyBeacon);
    }

    let kept = state.record(&durations).await;
    tracing::debug!("Beacon with {} episodes, {} kept", durations.len(), kept);
    Ok(StatusCode::NO_CONTENT)
}

/// Per-episode summaries
pub async fn list_episodes(State(state): State<Arc<AppState>>) -> Json<Vec<EpisodeSummary>> {
    Json(state.summaries().await)
}
