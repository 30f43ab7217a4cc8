//! API Routes

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::service_status))
        // Control plane
        .route("/update_urls", post(update_urls))
        .route("/api/channels", get(list_channels))
        .route("/api/channels/:id", delete(remove_channel))
        // Results
        .route("/api/v1/traffic", get(list_traffic))
        .route("/api/v1/traffic/:id", get(get_traffic))
        // Preview streaming
        .route("/video_feed/:id", get(video_feed))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct UpdateUrlsRequest {
    pub urls: HashMap<String, String>,
}

/// Register or update the serviced channel set
async fn update_urls(
    State(state): State<AppState>,
    Json(req): Json<UpdateUrlsRequest>,
) -> impl IntoResponse {
    let outcome = state.registry.update_channels(&req.urls).await;

    // Deregistered channels lose their capture and published result now,
    // not at some later cycle
    for id in &outcome.removed {
        state.capture.release(*id).await;
        state.store.remove(*id).await;
    }

    tracing::info!(
        active = outcome.active.len(),
        removed = outcome.removed.len(),
        rejected = outcome.rejected.len(),
        "Channel set updated"
    );

    let rejected: Vec<_> = outcome
        .rejected
        .iter()
        .map(|(id, reason)| json!({"channel": id, "reason": reason}))
        .collect();

    Json(json!({
        "status": "success",
        "active_channels": outcome.active,
        "removed": outcome.removed,
        "rejected": rejected,
    }))
}

/// Registered channels with their source addresses
async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    let channels: Vec<_> = state
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|(id, url)| json!({"channel_id": id, "url": url}))
        .collect();
    Json(json!({
        "channels": channels,
        "published": state.store.keys().await,
    }))
}

/// Explicitly deregister one channel
async fn remove_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<u32>,
) -> Result<impl IntoResponse> {
    if !state.registry.remove(channel_id).await {
        return Err(Error::NotFound(format!("channel {} not found", channel_id)));
    }
    state.capture.release(channel_id).await;
    state.store.remove(channel_id).await;
    Ok(Json(json!({"status": "success", "channel_id": channel_id})))
}

/// Latest results for every published channel
async fn list_traffic(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.snapshot().await)
}

/// Latest result for one channel.
///
/// 503 until the first analysis completes; clients are expected to poll.
async fn get_traffic(
    State(state): State<AppState>,
    Path(channel_id): Path<u32>,
) -> impl IntoResponse {
    match state.store.get(channel_id).await {
        Some(result) => Json(result).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no data"})),
        )
            .into_response(),
    }
}

/// MJPEG preview stream for one channel.
///
/// Pushes the latest published preview at a fixed interval until the
/// client disconnects; quiet (no yield) while the channel has no preview.
async fn video_feed(
    State(state): State<AppState>,
    Path(channel_id): Path<u32>,
) -> impl IntoResponse {
    let interval = state.config.stream_interval();
    let store = state.store.clone();

    let stream = async_stream::stream! {
        loop {
            if let Some(result) = store.get(channel_id).await {
                if let Some(jpeg) = result.preview_jpeg {
                    yield Ok::<Bytes, std::convert::Infallible>(mjpeg_part(&jpeg));
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    (
        [
            (
                header::CONTENT_TYPE,
                "multipart/x-mixed-replace; boundary=frame",
            ),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
}

/// Frame one JPEG as a multipart body part
fn mjpeg_part(jpeg: &Bytes) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 96);
    payload.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
    payload.extend_from_slice(jpeg.len().to_string().as_bytes());
    payload.extend_from_slice(b"\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}
