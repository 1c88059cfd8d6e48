//! Error handling for the sorting station

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame acquisition failed (transient, the vision loop skips the tick)
    #[error("Frame acquisition failed: {0}")]
    Acquisition(String),

    /// A classification workflow is already executing
    #[error("Classification already in progress")]
    ClassificationInProgress,

    /// No frame has been captured yet
    #[error("No frame available")]
    NoFrameAvailable,

    /// The external classifier returned no usable result
    #[error("Classifier failed: {0}")]
    Classifier(String),

    /// Actuation command was not acknowledged
    #[error("Actuation failed: {0}")]
    Actuation(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g. recalibration while an object is present)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// SQLx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Acquisition(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ACQUISITION_FAILED",
                msg.clone(),
            ),
            Error::ClassificationInProgress => (
                StatusCode::TOO_MANY_REQUESTS,
                "CLASSIFICATION_IN_PROGRESS",
                self.to_string(),
            ),
            Error::NoFrameAvailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_FRAME_AVAILABLE",
                self.to_string(),
            ),
            Error::Classifier(msg) => (StatusCode::BAD_GATEWAY, "CLASSIFIER_FAILED", msg.clone()),
            Error::Actuation(msg) => (StatusCode::BAD_GATEWAY, "ACTUATION_FAILED", msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Image(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IMAGE_ERROR",
                e.to_string(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
