//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let frame_seen = state.detection.last_frame_at().await.is_some();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "camera_streaming": frame_seen,
        "db_connected": true
    }))
}
