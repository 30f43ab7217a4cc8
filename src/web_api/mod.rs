//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - Control-plane channel registration
//! - Latest-result query API
//! - MJPEG preview streaming
//! - Health & status

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let inference_ok = state.detector.health_check().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        inference_connected: inference_ok,
        active_channels: state.registry.len().await,
        published_channels: state.store.len().await,
    };

    Json(response)
}

/// Status endpoint
pub async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "roadpulse",
        "version": env!("CARGO_PKG_VERSION"),
        "running": state.orchestrator.is_running().await,
        "cycle": state.orchestrator.cycle_count(),
        "active_channels": state.registry.len().await,
        "open_streams": state.capture.open_channels().await,
        "publish_backlog": state.publisher.backlog().await,
    }))
}
