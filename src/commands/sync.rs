//! Sync commands: refresh a repository's cached issues and report cache state.

use super::AppContext;
use crate::error::AppError;
use crate::models::repository::{Repository, RepositoryRef};
use crate::models::sync_log::SyncLogEntry;
use crate::services::sync_engine::{Freshness, SyncFailure, SyncReport};
use serde::Serialize;

/// Log entries returned with the sync status.
const STATUS_LOG_LIMIT: i64 = 10;

/// Response for get_sync_status command.
#[derive(Debug, Serialize)]
pub struct GetSyncStatusResponse {
    /// Cached repository, if it was ever synced.
    pub repository: Option<Repository>,
    /// Last successful full sync timestamp.
    pub last_sync_time: Option<i64>,
    /// Cached issue count.
    pub issue_count: i64,
    /// Whether the cache is cold or past the staleness window.
    pub is_stale: bool,
    /// Message of the latest attempt if it failed.
    pub last_error: Option<String>,
    /// Recent sync log entries for this repository.
    pub recent_logs: Vec<SyncLogEntry>,
}

/// Sync a whole repository, or one issue when `issue_number` is given.
///
/// # Returns
/// The sync report, or a failure with `cache_preserved` set
pub async fn sync_issues(
    ctx: &AppContext,
    repo_ref: &RepositoryRef,
    issue_number: Option<i64>,
) -> Result<SyncReport, SyncFailure> {
    let engine = ctx.sync_engine();
    match issue_number {
        Some(number) => engine.sync_issue(repo_ref, number).await,
        None => engine.sync_repository(repo_ref).await,
    }
}

/// Sync a repository only if its cache is cold, empty, or stale.
pub async fn ensure_fresh(
    ctx: &AppContext,
    repo_ref: &RepositoryRef,
) -> Result<Freshness, SyncFailure> {
    ctx.sync_engine().ensure_fresh(repo_ref).await
}

/// Get the cache state of a repository.
pub async fn get_sync_status(
    ctx: &AppContext,
    repo_ref: &RepositoryRef,
) -> Result<GetSyncStatusResponse, AppError> {
    let status = ctx.sync_engine().status(repo_ref, STATUS_LOG_LIMIT).await?;

    let last_error = status
        .recent_log
        .first()
        .filter(|entry| entry.is_error())
        .and_then(|entry| entry.message.clone());

    Ok(GetSyncStatusResponse {
        last_sync_time: status.repository.as_ref().and_then(|r| r.synced_at),
        repository: status.repository,
        issue_count: status.issue_count,
        is_stale: status.is_stale,
        last_error,
        recent_logs: status.recent_log,
    })
}

/// Get recent sync log entries across all repositories.
pub async fn get_sync_log(ctx: &AppContext, limit: i64) -> Result<Vec<SyncLogEntry>, AppError> {
    ctx.sync_engine().get_sync_log(limit).await
}
