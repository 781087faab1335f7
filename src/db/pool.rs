//! SQLite connection pool with WAL mode.
//!
//! Concurrent requests for the same user share this pool. WAL lets page
//! views keep reading while a sync transaction is writing.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Tunables for the local store's connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum open connections.
    pub max_connections: u32,

    /// How long a writer waits on a locked database before failing, in seconds.
    pub busy_timeout_secs: u64,

    /// How long to wait for a free connection, in seconds.
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout_secs: 30,
            acquire_timeout_secs: 10,
        }
    }
}

/// Create a connection pool with the default [`PoolConfig`].
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    create_pool_with(db_path, &PoolConfig::default()).await
}

/// Create a connection pool with WAL mode and foreign keys enabled.
///
/// The parent directory must already exist; `create_if_missing` only
/// creates the database file itself.
pub async fn create_pool_with(db_path: &Path, config: &PoolConfig) -> Result<DbPool, sqlx::Error> {
    let db_url = format!("sqlite:{}", db_path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Issues and comments cascade from their repository
        .foreign_keys(true)
        // Two tabs syncing the same repository wait on each other instead of failing
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
        .pragma("wal_autocheckpoint", "1000");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(connect_options)
        .await?;

    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;
    if !mode.0.eq_ignore_ascii_case("wal") {
        log::warn!("SQLite journal mode is {}, expected wal", mode.0);
    }

    Ok(pool)
}
