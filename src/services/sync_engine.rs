//! Request-scoped sync of a repository's issues into the local store.
//!
//! A sync fetches remote data through [`RateLimitedClient`] and writes it in a
//! single transaction:
//! - fetch failures return before the store is touched
//! - any failure after that rolls the whole batch back
//! - every attempt is recorded in `sync_log`, success or not
//!
//! Failures are returned as [`SyncFailure`] values with `cache_preserved`
//! set, so callers can keep showing what was cached before.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::comment;
use crate::models::issue;
use crate::models::repository::{self, Repository, RepositoryRef};
use crate::models::sync_log::{self, LogStatus, NewSyncLogEntry, SyncLogEntry};
use crate::models::now;
use crate::services::credentials::CredentialProvider;
use crate::services::rate_limit::RateLimitInfo;
use crate::services::remote_client::{ApiResponse, ClientConfig, RateLimitedClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Default age after which a cached repository is refreshed (5 minutes).
pub const DEFAULT_STALE_AFTER_SECS: i64 = 300;

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Age in seconds after which [`SyncEngine::ensure_fresh`] re-syncs.
    pub stale_after_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

/// What one sync refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncScope {
    Repository,
    Issue(i64),
}

impl SyncScope {
    fn operation(&self) -> &'static str {
        match self {
            Self::Repository => "sync_repository",
            Self::Issue(_) => "sync_issue",
        }
    }

    fn issue_number(&self) -> Option<i64> {
        match self {
            Self::Repository => None,
            Self::Issue(number) => Some(*number),
        }
    }
}

/// Result of a successful sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Local repository row the issues were written under.
    pub repository_id: i64,

    /// Issue number for single-issue syncs.
    pub issue_number: Option<i64>,

    /// Issues written.
    pub synced_count: i64,

    /// Comments written.
    pub comment_count: i64,

    /// The issue listing hit the page cap. The repository is left unmarked
    /// so the next freshness check syncs again.
    pub truncated: bool,

    /// Latest core quota snapshot seen during the sync.
    pub rate_limit: Option<RateLimitInfo>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

/// A failed sync. The store holds exactly what it held before the attempt.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct SyncFailure {
    /// Underlying error.
    pub error: AppError,

    /// Message suitable for showing to the user.
    pub message: String,

    /// Always true: previously cached data is untouched.
    pub cache_preserved: bool,
}

impl SyncFailure {
    /// Classify an error into a user-facing failure.
    pub fn classify(error: AppError, domain: &str) -> Self {
        let message = match &error {
            AppError::RateLimited { resets_at, .. } => format!(
                "Rate limit exceeded for {}. Showing cached data until it resets at {}",
                domain,
                resets_at.to_rfc3339()
            ),
            AppError::Unauthorized { .. } => format!(
                "Authentication failed for {}: check your credentials",
                domain
            ),
            AppError::Configuration { message } | AppError::Credential { message } => {
                message.clone()
            }
            other => format!("Sync failed: {}", other),
        };

        Self {
            error,
            message,
            cache_preserved: true,
        }
    }

    /// Quota snapshot when the failure was a rate limit.
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        self.error.rate_limit()
    }
}

/// Outcome of [`SyncEngine::ensure_fresh`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Freshness {
    /// The cache was recent enough; nothing was fetched.
    Cached { repository: Repository },

    /// The cache was cold or stale and has been refreshed.
    Synced(SyncReport),
}

/// Cache state of one repository.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Cached repository row, `None` if it was never synced successfully.
    pub repository: Option<Repository>,

    /// Cached issues.
    pub issue_count: i64,

    /// Cold or older than the configured staleness window.
    pub is_stale: bool,

    /// Most recent attempts for this repository.
    pub recent_log: Vec<SyncLogEntry>,
}

/// Synchronizes repositories from the remote service into the store.
pub struct SyncEngine {
    /// Database connection pool.
    pool: DbPool,

    /// Credential source; tokens are read per sync and never stored.
    credentials: Arc<dyn CredentialProvider>,

    /// Client settings handed to each per-sync client.
    client_config: ClientConfig,

    /// Staleness settings.
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(
        pool: DbPool,
        credentials: Arc<dyn CredentialProvider>,
        client_config: ClientConfig,
        config: SyncConfig,
    ) -> Self {
        Self {
            pool,
            credentials,
            client_config,
            config,
        }
    }

    /// Refresh every issue of a repository, with comments.
    pub async fn sync_repository(&self, repo_ref: &RepositoryRef) -> Result<SyncReport, SyncFailure> {
        self.run(repo_ref, SyncScope::Repository).await
    }

    /// Refresh one issue and its comments.
    ///
    /// Does not stamp the repository as synced; only a full sync does.
    pub async fn sync_issue(
        &self,
        repo_ref: &RepositoryRef,
        number: i64,
    ) -> Result<SyncReport, SyncFailure> {
        self.run(repo_ref, SyncScope::Issue(number)).await
    }

    /// Sync only when the cache is cold, empty, or stale.
    pub async fn ensure_fresh(&self, repo_ref: &RepositoryRef) -> Result<Freshness, SyncFailure> {
        let cached = repository::find_repository(&self.pool, repo_ref)
            .await
            .map_err(|e| SyncFailure::classify(e.into(), &repo_ref.domain))?;

        if let Some(repository) = cached {
            let issue_count = issue::count_issues(&self.pool, repository.id)
                .await
                .map_err(|e| SyncFailure::classify(e.into(), &repo_ref.domain))?;

            if issue_count > 0 && !self.is_stale(&repository) {
                log::debug!(
                    "Serving {} from cache (synced {}s ago)",
                    repo_ref.full_name(),
                    repository.age_secs(now()).unwrap_or_default()
                );
                return Ok(Freshness::Cached { repository });
            }
        }

        self.sync_repository(repo_ref).await.map(Freshness::Synced)
    }

    /// Whether a cached repository is cold or past the staleness window.
    pub fn is_stale(&self, repository: &Repository) -> bool {
        repository.is_stale(now(), self.config.stale_after_secs)
    }

    /// Cache state and recent attempts for a repository.
    pub async fn status(&self, repo_ref: &RepositoryRef, log_limit: i64) -> Result<SyncStatus, AppError> {
        let repository = repository::find_repository(&self.pool, repo_ref).await?;

        let (issue_count, is_stale, recent_log) = match &repository {
            Some(repo) => (
                issue::count_issues(&self.pool, repo.id).await?,
                self.is_stale(repo),
                sync_log::recent_sync_log(&self.pool, Some(repo.id), log_limit).await?,
            ),
            None => (0, true, Vec::new()),
        };

        Ok(SyncStatus {
            repository,
            issue_count,
            is_stale,
            recent_log,
        })
    }

    /// Recent sync log entries across all repositories.
    pub async fn get_sync_log(&self, limit: i64) -> Result<Vec<SyncLogEntry>, AppError> {
        Ok(sync_log::recent_sync_log(&self.pool, None, limit).await?)
    }

    async fn run(&self, repo_ref: &RepositoryRef, scope: SyncScope) -> Result<SyncReport, SyncFailure> {
        let start = Instant::now();
        log::info!(
            "Starting {} for {} on {}",
            scope.operation(),
            repo_ref.full_name(),
            repo_ref.domain
        );

        let result = self.sync(repo_ref, scope).await;
        let duration_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                log::info!(
                    "Synced {} issues and {} comments for {} in {}ms",
                    report.synced_count,
                    report.comment_count,
                    repo_ref.full_name(),
                    duration_ms
                );
                if report.truncated {
                    log::warn!(
                        "Issue listing for {} stopped at the page cap; not marking it synced",
                        repo_ref.full_name()
                    );
                }
                self.log_attempt(
                    scope,
                    Some(report.repository_id),
                    LogStatus::Success,
                    format!(
                        "Synced {} issues, {} comments",
                        report.synced_count, report.comment_count
                    ),
                    duration_ms,
                )
                .await;
                Ok(report)
            }
            Err(error) => {
                let failure = SyncFailure::classify(error, &repo_ref.domain);
                log::warn!(
                    "{} failed for {}: {}",
                    scope.operation(),
                    repo_ref.full_name(),
                    failure.error
                );
                let repository_id = repository::find_repository(&self.pool, repo_ref)
                    .await
                    .ok()
                    .flatten()
                    .map(|r| r.id);
                self.log_attempt(
                    scope,
                    repository_id,
                    LogStatus::Error,
                    failure.message.clone(),
                    duration_ms,
                )
                .await;
                Err(failure)
            }
        }
    }

    /// Fetch, then write everything in one transaction.
    async fn sync(&self, repo_ref: &RepositoryRef, scope: SyncScope) -> Result<SyncReport, AppError> {
        if let SyncScope::Issue(number) = scope {
            if number < 1 {
                return Err(AppError::invalid_input_field(
                    format!("Issue number must be positive, got {}", number),
                    "issue_number",
                ));
            }
        }

        let credential = self
            .credentials
            .credential_for(repo_ref.user_id, &repo_ref.domain)?
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "No access token configured for {}",
                    repo_ref.domain
                ))
            })?;
        let client = RateLimitedClient::new(&credential, self.client_config.clone())?;

        let repository = client.get_repository(repo_ref).await?;
        let issues = match scope {
            SyncScope::Repository => client.list_issues(repo_ref).await?,
            SyncScope::Issue(number) => {
                let fetched = client.get_issue(repo_ref, number).await?;
                ApiResponse::new(vec![fetched.data], fetched.rate_limit)
            }
        };
        let mut rate_limit = issues.rate_limit.or(repository.rate_limit);

        let synced_at = now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database_with_op(e.to_string(), "begin sync transaction"))?;

        let repository_id =
            repository::upsert_repository(&mut *tx, repo_ref, &repository.data).await?;

        let mut synced_count = 0i64;
        let mut comment_count = 0i64;
        for data in &issues.data {
            let issue_id = issue::upsert_issue(&mut *tx, repository_id, data, synced_at).await?;

            // Dropping `tx` on error rolls back every issue written so far.
            let comments = client.list_comments(repo_ref, data.number).await?;
            for comment in &comments.data {
                comment::upsert_comment(&mut *tx, issue_id, comment, synced_at).await?;
                comment_count += 1;
            }
            rate_limit = comments.rate_limit.or(rate_limit);
            synced_count += 1;
        }

        // A listing cut short at the page cap leaves older issues unrefreshed.
        if scope == SyncScope::Repository && !issues.truncated {
            repository::mark_synced(&mut *tx, repository_id, synced_at).await?;
        }
        tx.commit()
            .await
            .map_err(|e| AppError::database_with_op(e.to_string(), "commit sync transaction"))?;

        Ok(SyncReport {
            repository_id,
            issue_number: scope.issue_number(),
            synced_count,
            comment_count,
            truncated: issues.truncated,
            rate_limit,
            duration_ms: 0,
        })
    }

    /// Record an attempt. Written outside the sync transaction so failures
    /// are kept; a failing log write never fails the sync.
    async fn log_attempt(
        &self,
        scope: SyncScope,
        repository_id: Option<i64>,
        status: LogStatus,
        message: String,
        duration_ms: i64,
    ) {
        let entry = NewSyncLogEntry {
            operation: scope.operation(),
            status,
            repository_id,
            issue_number: scope.issue_number(),
            message: Some(message),
            duration_ms: Some(duration_ms),
            timestamp: now(),
        };

        if let Err(e) = sync_log::insert_sync_log(&self.pool, &entry).await {
            log::warn!("Failed to write sync log entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::repository::RepositoryData;
    use crate::services::credentials::StaticCredentialProvider;
    use tempfile::{tempdir, TempDir};

    async fn setup_engine(credentials: StaticCredentialProvider) -> (TempDir, DbPool, SyncEngine) {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        let config = ClientConfig {
            // Nothing listens here; any network attempt fails fast.
            api_base_override: Some("http://127.0.0.1:9".to_string()),
            ..ClientConfig::default()
        };
        let engine = SyncEngine::new(
            pool.clone(),
            Arc::new(credentials),
            config,
            SyncConfig::default(),
        );
        (dir, pool, engine)
    }

    #[test]
    fn test_default_config() {
        assert_eq!(SyncConfig::default().stale_after_secs, 300);
        let parsed: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, SyncConfig::default());
    }

    #[test]
    fn test_failure_messages() {
        let unauthorized = SyncFailure::classify(AppError::unauthorized("Bad credentials"), "github.com");
        assert!(unauthorized.message.contains("check your credentials"));
        assert!(unauthorized.cache_preserved);

        let resets_at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let limited = SyncFailure::classify(AppError::rate_limited(resets_at, None), "github.com");
        assert!(limited.message.contains(&resets_at.to_rfc3339()));

        let other = SyncFailure::classify(AppError::server("Bad Gateway", 502, 4), "github.com");
        assert!(other.message.starts_with("Sync failed: "));

        let json = serde_json::to_value(&other).unwrap();
        assert_eq!(json["cache_preserved"], true);
        assert_eq!(json["error"]["type"], "Server");
    }

    #[tokio::test]
    async fn test_missing_credential_fails_without_network() {
        let (_dir, pool, engine) = setup_engine(StaticCredentialProvider::new()).await;
        let repo_ref = RepositoryRef::new(1, "github.com", "acme", "widgets");

        let failure = engine.sync_issue(&repo_ref, 42).await.unwrap_err();
        assert_eq!(failure.message, "No access token configured for github.com");
        assert!(matches!(failure.error, AppError::Configuration { .. }));
        assert!(failure.cache_preserved);

        let log = engine.get_sync_log(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, "sync_issue");
        assert_eq!(log[0].issue_number, Some(42));
        assert!(log[0].is_error());

        assert!(repository::find_repository(&pool, &repo_ref).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_issue_number_is_rejected() {
        let credentials = StaticCredentialProvider::new().with_token(1, "github.com", "token");
        let (_dir, _pool, engine) = setup_engine(credentials).await;
        let repo_ref = RepositoryRef::new(1, "github.com", "acme", "widgets");

        let failure = engine.sync_issue(&repo_ref, 0).await.unwrap_err();
        assert!(matches!(failure.error, AppError::InvalidInput { .. }));
        assert!(failure.message.starts_with("Sync failed: "));
    }

    #[tokio::test]
    async fn test_ensure_fresh_serves_recent_cache() {
        let credentials = StaticCredentialProvider::new().with_token(1, "github.com", "token");
        let (_dir, pool, engine) = setup_engine(credentials).await;
        let repo_ref = RepositoryRef::new(1, "github.com", "acme", "widgets");

        let mut conn = pool.acquire().await.unwrap();
        let repository_id = repository::upsert_repository(
            &mut conn,
            &repo_ref,
            &RepositoryData {
                full_name: "acme/widgets".to_string(),
                description: None,
                html_url: "https://github.com/acme/widgets".to_string(),
                open_issues_count: 1,
            },
        )
        .await
        .unwrap();
        issue::upsert_issue(
            &mut conn,
            repository_id,
            &issue::IssueData {
                number: 1,
                title: "Cached".to_string(),
                state: issue::IssueState::Open,
                body: None,
                author_login: None,
                author_avatar_url: None,
                labels: Vec::new(),
                assignees: Vec::new(),
                comments_count: 0,
                html_url: String::new(),
                remote_created_at: 0,
                remote_updated_at: 0,
            },
            now(),
        )
        .await
        .unwrap();
        repository::mark_synced(&mut conn, repository_id, now()).await.unwrap();
        drop(conn);

        match engine.ensure_fresh(&repo_ref).await.unwrap() {
            Freshness::Cached { repository } => assert_eq!(repository.id, repository_id),
            Freshness::Synced(_) => panic!("expected a cache hit"),
        }

        let status = engine.status(&repo_ref, 5).await.unwrap();
        assert_eq!(status.issue_count, 1);
        assert!(!status.is_stale);
    }

    #[tokio::test]
    async fn test_status_of_unknown_repository() {
        let (_dir, _pool, engine) = setup_engine(StaticCredentialProvider::new()).await;
        let repo_ref = RepositoryRef::new(1, "github.com", "acme", "unknown");

        let status = engine.status(&repo_ref, 5).await.unwrap();
        assert!(status.repository.is_none());
        assert!(status.is_stale);
        assert_eq!(status.issue_count, 0);
    }
}
