//! Issue model.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// State of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl From<&str> for IssueState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Label attached to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    /// Hex color without the leading `#`.
    #[serde(default)]
    pub color: String,
}

/// User assigned to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Issue attributes as normalized from the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueData {
    /// Remote-assigned number, unique within the repository.
    pub number: i64,
    pub title: String,
    pub state: IssueState,
    pub body: Option<String>,
    /// `None` when the author account no longer exists.
    pub author_login: Option<String>,
    pub author_avatar_url: Option<String>,
    pub labels: Vec<Label>,
    pub assignees: Vec<Assignee>,
    pub comments_count: i64,
    pub html_url: String,
    /// Remote creation timestamp (Unix).
    pub remote_created_at: i64,
    /// Remote update timestamp (Unix).
    pub remote_updated_at: i64,
}

/// An issue as shown to callers, whether read from the store or built
/// transiently from a remote search.
///
/// Transient issues have no `id`, no `repository_id` and no `synced_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Option<i64>,
    pub repository_id: Option<i64>,
    pub number: i64,
    pub title: String,
    pub state: IssueState,
    pub body: Option<String>,
    pub author_login: Option<String>,
    pub author_avatar_url: Option<String>,
    pub labels: Vec<Label>,
    pub assignees: Vec<Assignee>,
    pub comments_count: i64,
    pub html_url: String,
    pub remote_created_at: i64,
    pub remote_updated_at: i64,
    pub synced_at: Option<i64>,
}

impl Issue {
    /// Build an unsaved issue from remote data.
    pub fn transient(data: IssueData) -> Self {
        Self {
            id: None,
            repository_id: None,
            number: data.number,
            title: data.title,
            state: data.state,
            body: data.body,
            author_login: data.author_login,
            author_avatar_url: data.author_avatar_url,
            labels: data.labels,
            assignees: data.assignees,
            comments_count: data.comments_count,
            html_url: data.html_url,
            remote_created_at: data.remote_created_at,
            remote_updated_at: data.remote_updated_at,
            synced_at: None,
        }
    }

    /// Whether this issue is backed by a row in the store.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Never refreshed from the remote service.
    pub fn is_cold(&self) -> bool {
        self.synced_at.is_none()
    }

    /// Check if the issue carries a label (case-insensitive).
    pub fn has_label(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.labels.iter().any(|l| l.name.to_lowercase() == name)
    }

    /// Check if a login is among the assignees (case-insensitive).
    pub fn is_assigned_to(&self, login: &str) -> bool {
        let login = login.to_lowercase();
        self.assignees.iter().any(|a| a.login.to_lowercase() == login)
    }

    /// Check the author login (case-insensitive).
    pub fn is_authored_by(&self, login: &str) -> bool {
        self.author_login
            .as_deref()
            .is_some_and(|author| author.to_lowercase() == login.to_lowercase())
    }

    /// Case-insensitive substring match against title or body.
    pub fn mentions(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.title.to_lowercase().contains(&text)
            || self
                .body
                .as_deref()
                .is_some_and(|body| body.to_lowercase().contains(&text))
    }

    /// Fields used to compare local and remote results.
    pub fn summary(&self) -> (i64, &str, IssueState) {
        (self.number, self.title.as_str(), self.state)
    }
}

/// Raw `issues` row. Labels and assignees are stored as JSON arrays.
#[derive(Debug, Clone, FromRow)]
pub struct IssueRow {
    pub id: i64,
    pub repository_id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub body: Option<String>,
    pub author_login: Option<String>,
    pub author_avatar_url: Option<String>,
    pub labels: String,
    pub assignees: String,
    pub comments_count: i64,
    pub html_url: String,
    pub remote_created_at: i64,
    pub remote_updated_at: i64,
    pub synced_at: Option<i64>,
}

impl From<IssueRow> for Issue {
    fn from(row: IssueRow) -> Self {
        Self {
            id: Some(row.id),
            repository_id: Some(row.repository_id),
            number: row.number,
            title: row.title,
            state: IssueState::from(row.state.as_str()),
            body: row.body,
            author_login: row.author_login,
            author_avatar_url: row.author_avatar_url,
            labels: serde_json::from_str(&row.labels).unwrap_or_default(),
            assignees: serde_json::from_str(&row.assignees).unwrap_or_default(),
            comments_count: row.comments_count,
            html_url: row.html_url,
            remote_created_at: row.remote_created_at,
            remote_updated_at: row.remote_updated_at,
            synced_at: row.synced_at,
        }
    }
}

/// Column list for `IssueRow` queries.
pub const ISSUE_COLUMNS: &str = "id, repository_id, number, title, state, body, author_login, author_avatar_url, labels, assignees, comments_count, html_url, remote_created_at, remote_updated_at, synced_at";

/// Insert or refresh an issue by `(repository_id, number)`.
///
/// Explicit read-then-write on the caller's connection; the unique index is
/// the backstop if two syncs race. Returns the local row ID.
pub async fn upsert_issue(
    conn: &mut SqliteConnection,
    repository_id: i64,
    data: &IssueData,
    synced_at: i64,
) -> Result<i64, sqlx::Error> {
    let labels_json = serde_json::to_string(&data.labels).unwrap_or_else(|_| "[]".to_string());
    let assignees_json =
        serde_json::to_string(&data.assignees).unwrap_or_else(|_| "[]".to_string());

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM issues WHERE repository_id = ? AND number = ?")
            .bind(repository_id)
            .bind(data.number)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        Some((id,)) => {
            sqlx::query(
                r#"
                UPDATE issues SET
                    title = ?, state = ?, body = ?, author_login = ?, author_avatar_url = ?,
                    labels = ?, assignees = ?, comments_count = ?, html_url = ?,
                    remote_created_at = ?, remote_updated_at = ?, synced_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&data.title)
            .bind(data.state.to_string())
            .bind(&data.body)
            .bind(&data.author_login)
            .bind(&data.author_avatar_url)
            .bind(&labels_json)
            .bind(&assignees_json)
            .bind(data.comments_count)
            .bind(&data.html_url)
            .bind(data.remote_created_at)
            .bind(data.remote_updated_at)
            .bind(synced_at)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            Ok(id)
        }
        None => {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO issues (
                    repository_id, number, title, state, body, author_login, author_avatar_url,
                    labels, assignees, comments_count, html_url,
                    remote_created_at, remote_updated_at, synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(repository_id)
            .bind(data.number)
            .bind(&data.title)
            .bind(data.state.to_string())
            .bind(&data.body)
            .bind(&data.author_login)
            .bind(&data.author_avatar_url)
            .bind(&labels_json)
            .bind(&assignees_json)
            .bind(data.comments_count)
            .bind(&data.html_url)
            .bind(data.remote_created_at)
            .bind(data.remote_updated_at)
            .bind(synced_at)
            .fetch_one(&mut *conn)
            .await?;
            Ok(id)
        }
    }
}

/// Look up an issue by number.
pub async fn get_issue(
    pool: &DbPool,
    repository_id: i64,
    number: i64,
) -> Result<Option<Issue>, sqlx::Error> {
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {} FROM issues WHERE repository_id = ? AND number = ?",
        ISSUE_COLUMNS
    ))
    .bind(repository_id)
    .bind(number)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Issue::from))
}

/// Number of cached issues for a repository.
pub async fn count_issues(pool: &DbPool, repository_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM issues WHERE repository_id = ?")
        .bind(repository_id)
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::repository::{upsert_repository, RepositoryData, RepositoryRef};
    use tempfile::{tempdir, TempDir};

    async fn setup_test_db() -> (TempDir, DbPool, i64) {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let repository_id = upsert_repository(
            &mut conn,
            &RepositoryRef::new(1, "github.com", "acme", "widgets"),
            &RepositoryData {
                full_name: "acme/widgets".to_string(),
                description: None,
                html_url: "https://github.com/acme/widgets".to_string(),
                open_issues_count: 0,
            },
        )
        .await
        .unwrap();
        drop(conn);
        (dir, pool, repository_id)
    }

    fn make_issue(number: i64, title: &str) -> IssueData {
        IssueData {
            number,
            title: title.to_string(),
            state: IssueState::Open,
            body: Some("It broke".to_string()),
            author_login: Some("octocat".to_string()),
            author_avatar_url: None,
            labels: vec![Label {
                name: "needs review".to_string(),
                color: "fbca04".to_string(),
            }],
            assignees: vec![Assignee {
                login: "alice".to_string(),
                avatar_url: None,
            }],
            comments_count: 2,
            html_url: format!("https://github.com/acme/widgets/issues/{}", number),
            remote_created_at: 100,
            remote_updated_at: 200,
        }
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(IssueState::from("open"), IssueState::Open);
        assert_eq!(IssueState::from("CLOSED"), IssueState::Closed);
        assert_eq!(IssueState::from("unknown"), IssueState::Open);
        assert_eq!(IssueState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_transient_issue_is_unsaved() {
        let issue = Issue::transient(make_issue(5, "Crash"));
        assert!(!issue.is_persisted());
        assert!(issue.is_cold());
        assert!(issue.has_label("Needs Review"));
        assert_eq!(issue.summary(), (5, "Crash", IssueState::Open));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_dir, pool, repository_id) = setup_test_db().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = upsert_issue(&mut conn, repository_id, &make_issue(7, "Crash"), 10)
            .await
            .unwrap();
        let mut changed = make_issue(7, "Crash on start");
        changed.state = IssueState::Closed;
        let second = upsert_issue(&mut conn, repository_id, &changed, 20)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(first, second);
        assert_eq!(count_issues(&pool, repository_id).await.unwrap(), 1);

        let stored = get_issue(&pool, repository_id, 7).await.unwrap().unwrap();
        assert_eq!(stored.title, "Crash on start");
        assert_eq!(stored.state, IssueState::Closed);
        assert_eq!(stored.synced_at, Some(20));
        assert_eq!(stored.labels[0].name, "needs review");
        assert_eq!(stored.assignees[0].login, "alice");
    }

    #[test]
    fn test_matching_folds_non_ascii_case() {
        let mut data = make_issue(9, "Ärger beim Start");
        data.body = Some("Die Übersetzung fehlt".to_string());
        data.labels[0].name = "Übersetzung".to_string();
        data.assignees[0].login = "Željko".to_string();
        data.author_login = Some("Øyvind".to_string());
        let issue = Issue::transient(data);

        assert!(issue.has_label("übersetzung"));
        assert!(issue.is_assigned_to("željko"));
        assert!(issue.is_authored_by("ØYVIND"));
        assert!(issue.mentions("ärger"));
        assert!(issue.mentions("ÜBERSETZUNG"));
        assert!(!issue.mentions("absturz"));
        assert!(!issue.has_label("needs review"));
    }
}
