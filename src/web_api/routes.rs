//! API Routes

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(station_status))
        // Classification
        .route("/api/classify", post(trigger_classification))
        .route("/api/history", get(classification_history))
        .route("/api/messages", get(speech_messages))
        // Vision
        .route("/api/recalibrate", post(recalibrate_background))
        .route("/video_feed", get(video_feed))
        .route("/snapshot.jpg", get(snapshot))
        .with_state(state)
}

// ========================================
// Status Handlers
// ========================================

async fn station_status(State(state): State<AppState>) -> impl IntoResponse {
    let phase = state.phase.read().await.clone();

    Json(json!({
        "phase": phase.phase,
        "phase_entered_at": phase.entered_at,
        "object_present": state.detection.object_present().await,
        "object_stable": state.detection.peek_stable().await,
        "last_frame_at": state.detection.last_frame_at().await,
    }))
}

// ========================================
// Classification Handlers
// ========================================

/// Manual classification trigger.
///
/// Runs the same single-flight workflow as the automatic cycle; a second
/// request while one is in flight gets 429.
async fn trigger_classification(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let outcome = state.workflow.run().await?;
    Ok(Json(json!({
        "status": "success",
        "classification": outcome
    })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn classification_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let records = state.history.recent(limit).await?;
    Ok(Json(records))
}

async fn speech_messages(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "messages": state.speech.drain().await }))
}

// ========================================
// Vision Handlers
// ========================================

/// Request a background recapture.
///
/// Refused while an object is in front of the camera; recalibrating then
/// would bake the object into the background.
async fn recalibrate_background(State(state): State<AppState>) -> Result<impl IntoResponse> {
    if state.detection.object_present().await {
        return Err(Error::Conflict(
            "cannot recalibrate while an object is present".to_string(),
        ));
    }

    state.detection.request_recalibration().await;
    Ok(Json(json!({ "status": "recalibration_requested" })))
}

/// Wrap one JPEG as a multipart/x-mixed-replace part.
fn mjpeg_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// MJPEG stream of annotated frames.
async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let detection = state.detection.clone();
    let stream = futures::stream::unfold(detection, |detection| async move {
        tokio::time::sleep(Duration::from_millis(33)).await;
        let chunk = match detection.annotated_jpeg().await {
            Some(jpeg) => mjpeg_chunk(&jpeg),
            None => Vec::new(),
        };
        Some((Ok::<_, Infallible>(Bytes::from(chunk)), detection))
    });

    (
        StatusCode::OK,
        [
            (
                "content-type",
                "multipart/x-mixed-replace; boundary=frame",
            ),
            ("cache-control", "no-cache, no-store, must-revalidate"),
        ],
        Body::from_stream(stream),
    )
}

/// Latest clean frame, without detection overlays.
async fn snapshot(State(state): State<AppState>) -> Result<impl IntoResponse> {
    match state.detection.clean_jpeg().await? {
        Some(jpeg) => Ok((
            StatusCode::OK,
            [
                ("content-type", "image/jpeg"),
                ("cache-control", "no-cache, no-store, must-revalidate"),
            ],
            jpeg,
        )),
        None => Err(Error::NotFound("no frame captured yet".to_string())),
    }
}
