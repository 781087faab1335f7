//! Sync log model.
//!
//! One row per sync attempt, written outside the sync transaction so that
//! failed attempts are recorded even though their data was rolled back.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of a sync log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl From<&str> for LogStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Recorded sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncLogEntry {
    /// Log entry ID.
    pub id: i64,

    /// Operation: `sync_repository` or `sync_issue`.
    pub operation: String,

    /// Status: `success`, `error`.
    pub status: String,

    /// Repository row, if one existed at the time.
    pub repository_id: Option<i64>,

    /// Issue number for single-issue syncs.
    pub issue_number: Option<i64>,

    /// Details or error message.
    pub message: Option<String>,

    /// Operation duration in milliseconds.
    pub duration_ms: Option<i64>,

    /// When the attempt finished (Unix).
    pub timestamp: i64,
}

impl SyncLogEntry {
    /// Maximum number of log entries to keep.
    pub const MAX_ENTRIES: i64 = 50;

    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> LogStatus {
        LogStatus::from(self.status.as_str())
    }

    /// Check if this log entry represents an error.
    pub fn is_error(&self) -> bool {
        self.status_enum() == LogStatus::Error
    }
}

/// Fields of a log entry about to be written.
#[derive(Debug, Clone)]
pub struct NewSyncLogEntry<'a> {
    pub operation: &'a str,
    pub status: LogStatus,
    pub repository_id: Option<i64>,
    pub issue_number: Option<i64>,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

/// Append a log entry and prune the log to [`SyncLogEntry::MAX_ENTRIES`].
pub async fn insert_sync_log(pool: &DbPool, entry: &NewSyncLogEntry<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_log (operation, status, repository_id, issue_number, message, duration_ms, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.operation)
    .bind(entry.status.to_string())
    .bind(entry.repository_id)
    .bind(entry.issue_number)
    .bind(&entry.message)
    .bind(entry.duration_ms)
    .bind(entry.timestamp)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM sync_log WHERE id NOT IN (
            SELECT id FROM sync_log ORDER BY timestamp DESC, id DESC LIMIT ?
        )
        "#,
    )
    .bind(SyncLogEntry::MAX_ENTRIES)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent log entries, optionally limited to one repository.
pub async fn recent_sync_log(
    pool: &DbPool,
    repository_id: Option<i64>,
    limit: i64,
) -> Result<Vec<SyncLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, SyncLogEntry>(
        r#"
        SELECT id, operation, status, repository_id, issue_number, message, duration_ms, timestamp
        FROM sync_log
        WHERE (?1 IS NULL OR repository_id = ?1)
        ORDER BY timestamp DESC, id DESC
        LIMIT ?2
        "#,
    )
    .bind(repository_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
