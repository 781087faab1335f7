//! Issue search over the local store or the remote search endpoint.
//!
//! Both paths return the same [`Issue`] shape. Remote results are built as
//! transient issues and never written to the store, so a filtered search can
//! not overwrite the cache. The engine never retries or falls back on its
//! own; see [`crate::commands::search::search_with_fallback`].

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::issue::{Issue, IssueRow, IssueState, ISSUE_COLUMNS};
use crate::models::repository::{self, RepositoryRef};
use crate::services::credentials::CredentialProvider;
use crate::services::rate_limit::RateLimitInfo;
use crate::services::remote_client::{ClientConfig, RateLimitedClient, SearchQuery};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use thiserror::Error;

/// Default page size, matching the remote API default.
pub const DEFAULT_PER_PAGE: u32 = 30;

/// Largest page the remote API serves.
const MAX_PER_PAGE: u32 = 100;

/// Where a search runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Filtered scan of the local store. Never touches the network.
    Local,
    /// The remote search endpoint.
    #[default]
    Remote,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Structured filters. All present filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub state: Option<IssueState>,
    /// Every label listed must be present on the issue.
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub author: Option<String>,
}

/// Sortable fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Created,
    #[default]
    Updated,
    Comments,
}

impl SortField {
    /// Name used by the remote `sort` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Comments => "comments",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Created => "remote_created_at",
            Self::Updated => "remote_updated_at",
            Self::Comments => "comments_count",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "comments" => Some(Self::Comments),
            _ => None,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Name used by the remote `order` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sort field plus direction. Defaults to `updated` descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Parse `field` or `field-direction` (e.g. `comments`, `created-asc`).
    ///
    /// A bare field sorts descending. Anything unrecognized falls back to
    /// the default.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_lowercase();
        let (field, direction) = match normalized.split_once('-') {
            Some((field, direction)) => (field, Some(direction)),
            None => (normalized.as_str(), None),
        };

        let Some(field) = SortField::parse(field) else {
            return Self::default();
        };
        let direction = match direction {
            None | Some("desc") => SortDirection::Desc,
            Some("asc") => SortDirection::Asc,
            Some(_) => return Self::default(),
        };

        Self { field, direction }
    }
}

impl std::fmt::Display for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.field.as_str(), self.direction.as_str())
    }
}

/// One search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Free text matched against title and body.
    pub query: String,
    pub filters: SearchFilters,
    pub sort: SortSpec,
    pub mode: SearchMode,
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: SearchFilters::default(),
            sort: SortSpec::default(),
            mode: SearchMode::default(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl SearchRequest {
    /// The same request, run in another mode.
    pub fn with_mode(&self, mode: SearchMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    fn page(&self) -> u32 {
        self.page.max(1)
    }

    fn per_page(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }
}

/// A successful search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub issues: Vec<Issue>,

    /// Mode that actually produced the results.
    pub mode: SearchMode,

    /// Total matches across all pages.
    pub total_count: i64,

    /// Remote search stopped before scanning everything.
    pub incomplete_results: bool,

    /// Search quota snapshot (remote mode only).
    pub rate_limit: Option<RateLimitInfo>,
}

/// A failed search.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct SearchFailure {
    pub error: AppError,

    /// Message suitable for showing to the user.
    pub message: String,

    /// Mode that failed.
    pub mode: SearchMode,

    /// Quota snapshot, present for rate-limit failures when upstream reported one.
    pub rate_limit: Option<RateLimitInfo>,
}

impl SearchFailure {
    /// Classify an error into a user-facing failure.
    pub fn classify(error: AppError, mode: SearchMode, domain: &str) -> Self {
        let message = match &error {
            AppError::RateLimited { resets_at, .. } => format!(
                "Search rate limit exceeded for {}. Resets at {}",
                domain,
                resets_at.to_rfc3339()
            ),
            AppError::Unauthorized { .. } => {
                format!("Search failed: check your credentials for {}", domain)
            }
            AppError::Configuration { message } | AppError::Credential { message } => {
                message.clone()
            }
            other => {
                log::error!("{} search failed for {}: {:?}", mode, domain, other);
                format!("Search failed: {}", other)
            }
        };

        Self {
            rate_limit: error.rate_limit().cloned(),
            error,
            message,
            mode,
        }
    }
}

/// Assemble the remote query string for a repository.
///
/// `repo:owner/name is:issue`, then the free text, then one qualifier per
/// filter. Label values containing whitespace are quoted; double quotes
/// inside a label are dropped since the search syntax cannot escape them.
pub fn build_remote_query(repo_ref: &RepositoryRef, text: &str, filters: &SearchFilters) -> String {
    let mut parts = vec![format!("repo:{}", repo_ref.full_name()), "is:issue".to_string()];

    let text = text.trim();
    if !text.is_empty() {
        parts.push(text.to_string());
    }
    if let Some(state) = filters.state {
        parts.push(format!("state:{}", state));
    }
    for label in filters.labels.iter().map(|l| l.replace('"', "")) {
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        if label.chars().any(char::is_whitespace) {
            parts.push(format!("label:\"{}\"", label));
        } else {
            parts.push(format!("label:{}", label));
        }
    }
    if let Some(assignee) = non_empty(&filters.assignee) {
        parts.push(format!("assignee:{}", assignee));
    }
    if let Some(author) = non_empty(&filters.author) {
        parts.push(format!("author:{}", author));
    }

    parts.join(" ")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Runs searches in either mode.
pub struct SearchEngine {
    pool: DbPool,
    credentials: Arc<dyn CredentialProvider>,
    client_config: ClientConfig,
}

impl SearchEngine {
    pub fn new(
        pool: DbPool,
        credentials: Arc<dyn CredentialProvider>,
        client_config: ClientConfig,
    ) -> Self {
        Self {
            pool,
            credentials,
            client_config,
        }
    }

    /// Run one search in the requested mode. A failure is terminal for this call.
    pub async fn search(
        &self,
        repo_ref: &RepositoryRef,
        request: &SearchRequest,
    ) -> Result<SearchResults, SearchFailure> {
        let result = match request.mode {
            SearchMode::Local => self.search_local(repo_ref, request).await,
            SearchMode::Remote => self.search_remote(repo_ref, request).await,
        };

        result.map_err(|e| SearchFailure::classify(e, request.mode, &repo_ref.domain))
    }

    async fn search_local(
        &self,
        repo_ref: &RepositoryRef,
        request: &SearchRequest,
    ) -> Result<SearchResults, AppError> {
        let Some(repository) = repository::find_repository(&self.pool, repo_ref).await? else {
            return Ok(SearchResults {
                issues: Vec::new(),
                mode: SearchMode::Local,
                total_count: 0,
                incomplete_results: false,
                rate_limit: None,
            });
        };

        // SQLite's lower() only folds ASCII, so text and name filters run
        // on the fetched rows; the query narrows by repository and state.
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM issues WHERE repository_id = ",
            ISSUE_COLUMNS
        ));
        query.push_bind(repository.id);
        if let Some(state) = request.filters.state {
            query.push(" AND state = ");
            query.push_bind(state.to_string());
        }
        query.push(format!(
            " ORDER BY {} {}, number DESC",
            request.sort.field.column(),
            request.sort.direction.sql()
        ));

        let rows = query
            .build_query_as::<IssueRow>()
            .fetch_all(&self.pool)
            .await?;

        let matched: Vec<Issue> = rows
            .into_iter()
            .map(Issue::from)
            .filter(|issue| matches_local_filters(issue, request))
            .collect();
        let total_count = matched.len() as i64;

        let per_page = request.per_page() as usize;
        let offset = (request.page() as usize - 1).saturating_mul(per_page);
        let issues = matched.into_iter().skip(offset).take(per_page).collect();

        Ok(SearchResults {
            issues,
            mode: SearchMode::Local,
            total_count,
            incomplete_results: false,
            rate_limit: None,
        })
    }

    async fn search_remote(
        &self,
        repo_ref: &RepositoryRef,
        request: &SearchRequest,
    ) -> Result<SearchResults, AppError> {
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

        let query = SearchQuery {
            q: build_remote_query(repo_ref, &request.query, &request.filters),
            sort: Some(request.sort.field.as_str().to_string()),
            order: Some(request.sort.direction.as_str().to_string()),
            page: Some(request.page()),
            per_page: Some(request.per_page()),
        };
        log::debug!("Remote search on {}: {}", repo_ref.domain, query.q);

        let response = client.search_issues(&query).await?;
        let page = response.data;

        Ok(SearchResults {
            issues: page.items.into_iter().map(Issue::transient).collect(),
            mode: SearchMode::Remote,
            total_count: page.total_count,
            incomplete_results: page.incomplete_results,
            rate_limit: response.rate_limit,
        })
    }
}

/// Free text, labels, assignee and author for a local search. All must match.
fn matches_local_filters(issue: &Issue, request: &SearchRequest) -> bool {
    let text = request.query.trim();
    if !text.is_empty() && !issue.mentions(text) {
        return false;
    }

    let filters = &request.filters;
    filters
        .labels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .all(|label| issue.has_label(label))
        && non_empty(&filters.assignee).map_or(true, |login| issue.is_assigned_to(login))
        && non_empty(&filters.author).map_or(true, |login| issue.is_authored_by(login))
}
