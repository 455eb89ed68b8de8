//! Error types for the collector

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Beacon carries no episodes")]
    EmptyBeacon,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CollectorError::EmptyBeacon => (
                StatusCode::BAD_REQUEST,
                "Missing or empty ets parameter".to_string(),
            ),
            CollectorError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Configuration error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
