use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub default_loggers_disabled: bool,
}

/// Basic health check endpoint
pub async fn health(State(_state): State<AppState>) -> Json<HealthResponse> {
    info!("Health check requested");

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "request-logger".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        default_loggers_disabled: crate::telemetry::default_loggers_disabled(),
    })
}
