//! Data models for the local issue cache.
//!
//! These models represent the entities stored in the local SQLite database
//! together with the store operations that read and write them. Row types
//! derive `FromRow` for SQLx; the public shapes derive `Serialize` so they
//! can be handed straight to the presentation layer.
//!
//! Write operations take a `&mut SqliteConnection` so the sync engine can run
//! them inside one transaction; read operations take the pool.

pub mod comment;
pub mod issue;
pub mod repository;
pub mod sync_log;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-exports for convenient access
pub use comment::{Comment, CommentData};
pub use issue::{Assignee, Issue, IssueData, IssueState, Label};
pub use repository::{Repository, RepositoryData, RepositoryRef};
pub use sync_log::{LogStatus, SyncLogEntry};

/// Get the current Unix timestamp.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
