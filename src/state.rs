//! Application state
//!
//! Holds all shared components and state

use crate::history::HistoryService;
use crate::orchestrator::PhaseState;
use crate::speech::SpeechQueue;
use crate::vision::DetectionState;
use crate::workflow::ClassificationWorkflow;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Snapshot URL of the station camera
    pub camera_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Serial port of the sorting microcontroller
    pub serial_port: String,
    /// Serial baud rate
    pub serial_baud: u32,
    /// Classifier API keys (comma separated in GEMINI_API_KEYS)
    pub gemini_api_keys: Vec<String>,
    /// How long an object must stay still before it counts as settled
    pub stability_duration: Duration,
    /// Max wait for an object to settle
    pub stability_timeout: Duration,
    /// Pause after each classification
    pub cooldown: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:sortstation.db".to_string()),
            camera_url: std::env::var("CAMERA_URL")
                .unwrap_or_else(|_| "http://localhost:8081/snapshot.jpg".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            serial_port: std::env::var("SERIAL_PORT")
                .unwrap_or_else(|_| "/dev/ttyACM0".to_string()),
            serial_baud: std::env::var("SERIAL_BAUD")
                .ok()
                .and_then(|b| b.parse().ok())
                .unwrap_or(9600),
            gemini_api_keys: std::env::var("GEMINI_API_KEYS")
                .map(|keys| {
                    keys.split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            stability_duration: Duration::from_millis(
                std::env::var("STABILITY_DURATION_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            stability_timeout: Duration::from_secs(
                std::env::var("STABILITY_TIMEOUT_SEC")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
            cooldown: Duration::from_secs(
                std::env::var("COOLDOWN_SEC")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// Shared detection flags and frames
    pub detection: Arc<DetectionState>,
    /// Classification record persistence
    pub history: Arc<HistoryService>,
    /// Classification workflow (single flight)
    pub workflow: Arc<ClassificationWorkflow>,
    /// Spoken-message queue for the UI
    pub speech: Arc<SpeechQueue>,
    /// Current orchestrator phase
    pub phase: Arc<RwLock<PhaseState>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.serial_baud, 9600);
        assert_eq!(config.stability_duration, Duration::from_secs(1));
        assert_eq!(config.stability_timeout, Duration::from_secs(10));
        assert_eq!(config.cooldown, Duration::from_secs(10));
    }
}
