//! Tracked repository model.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// Public GitHub host. Any other domain is treated as an enterprise instance.
pub const PUBLIC_DOMAIN: &str = "github.com";

/// Identifies one user's view of one upstream repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Owning local user.
    pub user_id: i64,

    /// Host the repository lives on (e.g. `github.com`, `github.acme.corp`).
    pub domain: String,

    /// Repository owner (user or organization login).
    pub owner: String,

    /// Repository name.
    pub name: String,
}

impl RepositoryRef {
    /// Create a reference, normalizing the domain.
    pub fn new(
        user_id: i64,
        domain: impl AsRef<str>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            domain: normalize_domain(domain.as_ref()),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner/name` slug.
    pub fn from_slug(user_id: i64, domain: &str, slug: &str) -> Option<Self> {
        let (owner, name) = slug.trim().trim_matches('/').split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(user_id, domain, owner, name))
    }

    /// `owner/name`, as used by the remote API and the `repo:` qualifier.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Whether this repository lives on the public host.
    pub fn is_public_host(&self) -> bool {
        self.domain == PUBLIC_DOMAIN
    }
}

/// Normalize a domain: strip any scheme and trailing slashes, lowercase.
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/').to_lowercase()
}

/// Repository attributes as normalized from the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryData {
    /// `owner/name` as reported upstream (canonical casing).
    pub full_name: String,

    /// Repository description.
    pub description: Option<String>,

    /// Web URL.
    pub html_url: String,

    /// Open issue count reported upstream.
    pub open_issues_count: i64,
}

/// Cached repository row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    /// Local row ID.
    pub id: i64,

    /// Owning local user.
    pub user_id: i64,

    /// Host domain.
    pub domain: String,

    /// Owner login.
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Display name (`owner/name`).
    pub full_name: String,

    /// Repository description.
    pub description: Option<String>,

    /// Web URL.
    pub html_url: String,

    /// Open issue count reported upstream.
    pub open_issues_count: i64,

    /// Last successful sync (Unix). `None` means never synced.
    pub synced_at: Option<i64>,

    /// When the row was first created (Unix).
    pub created_at: i64,
}

impl Repository {
    /// Never synced from the remote service.
    pub fn is_cold(&self) -> bool {
        self.synced_at.is_none()
    }

    /// Seconds since the last sync, `None` when cold.
    pub fn age_secs(&self, now: i64) -> Option<i64> {
        self.synced_at.map(|synced| (now - synced).max(0))
    }

    /// Whether the cache is older than `max_age_secs` (cold counts as stale).
    pub fn is_stale(&self, now: i64, max_age_secs: i64) -> bool {
        match self.age_secs(now) {
            Some(age) => age >= max_age_secs,
            None => true,
        }
    }
}

const SELECT_REPOSITORY: &str = "SELECT id, user_id, domain, owner, name, full_name, description, html_url, open_issues_count, synced_at, created_at FROM repositories";

/// Look up a repository by its natural key.
pub async fn find_repository(
    pool: &DbPool,
    repo_ref: &RepositoryRef,
) -> Result<Option<Repository>, sqlx::Error> {
    sqlx::query_as::<_, Repository>(&format!(
        "{} WHERE user_id = ? AND domain = ? AND owner = ? AND name = ?",
        SELECT_REPOSITORY
    ))
    .bind(repo_ref.user_id)
    .bind(&repo_ref.domain)
    .bind(&repo_ref.owner)
    .bind(&repo_ref.name)
    .fetch_optional(pool)
    .await
}

/// Look up a repository by local row ID.
pub async fn get_repository(
    pool: &DbPool,
    repository_id: i64,
) -> Result<Option<Repository>, sqlx::Error> {
    sqlx::query_as::<_, Repository>(&format!("{} WHERE id = ?", SELECT_REPOSITORY))
        .bind(repository_id)
        .fetch_optional(pool)
        .await
}

/// Find-or-create a repository row and refresh its attributes.
///
/// Runs as read-then-write on the caller's connection so it can join the
/// sync transaction; the unique index on the natural key backs it up.
/// `synced_at` is left untouched; see [`mark_synced`].
pub async fn upsert_repository(
    conn: &mut SqliteConnection,
    repo_ref: &RepositoryRef,
    data: &RepositoryData,
) -> Result<i64, sqlx::Error> {
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM repositories WHERE user_id = ? AND domain = ? AND owner = ? AND name = ?",
    )
    .bind(repo_ref.user_id)
    .bind(&repo_ref.domain)
    .bind(&repo_ref.owner)
    .bind(&repo_ref.name)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some((id,)) => {
            sqlx::query(
                "UPDATE repositories SET full_name = ?, description = ?, html_url = ?, open_issues_count = ? WHERE id = ?",
            )
            .bind(&data.full_name)
            .bind(&data.description)
            .bind(&data.html_url)
            .bind(data.open_issues_count)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            Ok(id)
        }
        None => {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO repositories (user_id, domain, owner, name, full_name, description, html_url, open_issues_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(repo_ref.user_id)
            .bind(&repo_ref.domain)
            .bind(&repo_ref.owner)
            .bind(&repo_ref.name)
            .bind(&data.full_name)
            .bind(&data.description)
            .bind(&data.html_url)
            .bind(data.open_issues_count)
            .fetch_one(&mut *conn)
            .await?;
            Ok(id)
        }
    }
}

/// Stamp a repository as freshly synced.
pub async fn mark_synced(
    conn: &mut SqliteConnection,
    repository_id: i64,
    synced_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE repositories SET synced_at = ? WHERE id = ?")
        .bind(synced_at)
        .bind(repository_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// All repositories tracked by a user, most recently synced first.
pub async fn list_repositories(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<Repository>, sqlx::Error> {
    sqlx::query_as::<_, Repository>(&format!(
        "{} WHERE user_id = ? ORDER BY synced_at IS NULL, synced_at DESC, full_name",
        SELECT_REPOSITORY
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}
