//! HistoryService - Classification Record Persistence
//!
//! ## Responsibilities
//!
//! - Persist one record per completed classification workflow
//! - Single status update after the dispatch outcome is known
//! - Provide the recent-history query for the UI
//!
//! Append-mostly: the core never reads records back for decisions.

use crate::classifier::DetectedObject;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Dispatch outcome of a classification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    /// Record created, actuation not decided yet
    Pending,
    /// Microcontroller acknowledged the command
    Dispatched,
    /// Command failed, timed out or was not acknowledged
    ActuationError,
    /// Classifier found nothing actionable; no command sent
    NotRequired,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "PENDING",
            DispatchStatus::Dispatched => "DISPATCHED",
            DispatchStatus::ActuationError => "ACTUATION_ERROR",
            DispatchStatus::NotRequired => "NOT_REQUIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DispatchStatus::Pending),
            "DISPATCHED" => Some(DispatchStatus::Dispatched),
            "ACTUATION_ERROR" => Some(DispatchStatus::ActuationError),
            "NOT_REQUIRED" => Some(DispatchStatus::NotRequired),
            _ => None,
        }
    }
}

/// One classification record as stored.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub material: Option<String>,
    pub detected_objects: Vec<DetectedObject>,
    pub confidence: f32,
    pub dispatch_status: DispatchStatus,
    pub spoken_response: String,
}

/// HistoryService instance
pub struct HistoryService {
    pool: SqlitePool,
}

impl HistoryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the history table if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS classification_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                material TEXT,
                detected_objects TEXT NOT NULL,
                confidence REAL NOT NULL,
                dispatch_status TEXT NOT NULL,
                spoken_response TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("History schema verified");
        Ok(())
    }

    /// Insert a new record; returns its id.
    pub async fn add_record(
        &self,
        material: Option<&str>,
        objects: &[DetectedObject],
        confidence: f32,
        status: DispatchStatus,
        spoken_response: &str,
    ) -> Result<i64> {
        let objects_json = serde_json::to_string(objects)?;

        let result = sqlx::query(
            r#"
            INSERT INTO classification_history
                (recorded_at, material, detected_objects, confidence, dispatch_status, spoken_response)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(material)
        .bind(&objects_json)
        .bind(confidence)
        .bind(status.as_str())
        .bind(spoken_response)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(record_id = id, material = ?material, "Classification record added");
        Ok(id)
    }

    /// Update only the dispatch status of an existing record.
    pub async fn update_status(&self, record_id: i64, status: DispatchStatus) -> Result<()> {
        sqlx::query("UPDATE classification_history SET dispatch_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(record_id = record_id, status = %status.as_str(), "Record status updated");
        Ok(())
    }

    /// Most recent records, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recorded_at, material, detected_objects,
                   confidence, dispatch_status, spoken_response
            FROM classification_history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| {
                let recorded_at: String = row.get("recorded_at");
                let objects_json: String = row.get("detected_objects");
                let status: String = row.get("dispatch_status");
                HistoryRecord {
                    id: row.get("id"),
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    material: row.get("material"),
                    detected_objects: serde_json::from_str(&objects_json).unwrap_or_default(),
                    confidence: row.get("confidence"),
                    dispatch_status: DispatchStatus::parse(&status)
                        .unwrap_or(DispatchStatus::Pending),
                    spoken_response: row.get("spoken_response"),
                }
            })
            .collect();

        Ok(records)
    }
}
