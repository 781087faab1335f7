//! GitHub REST API client with rate-limit tracking and retries.
//!
//! Every call goes through [`RateLimitedClient::get_with_retry`], which:
//! - records the `x-ratelimit-*` snapshot of each response per quota bucket
//! - retries server-class failures (5xx, timeouts, connection errors) with
//!   exponential backoff, including timeouts while the body is streaming
//! - surfaces rate limits immediately instead of sleeping them out
//!
//! Payloads are normalized into the model shapes (`RepositoryData`,
//! `IssueData`, `CommentData`) before they leave this module.

use crate::error::AppError;
use crate::models::comment::CommentData;
use crate::models::issue::{Assignee, IssueData, IssueState, Label};
use crate::models::repository::{normalize_domain, RepositoryData, RepositoryRef, PUBLIC_DOMAIN};
use crate::services::credentials::Credential;
use crate::services::rate_limit::{QuotaBucket, RateLimitInfo, RateLimitThresholds, RateLimitTracker};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// API base for the public host.
pub const PUBLIC_API_BASE: &str = "https://api.github.com";

/// GitHub caps `per_page` at 100.
const MAX_PER_PAGE: u32 = 100;

/// Retry policy for server-class failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds; doubles on each retry.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Exponential backoff without jitter, so delays follow [`Self::delay_for`].
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_factor(2.0)
            .with_max_delay(self.delay_for(self.max_retries))
            .with_max_times(self.max_retries as usize)
    }
}

/// Remote API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Read timeout per request, in seconds.
    pub timeout_secs: u64,

    /// Connect timeout per request, in seconds.
    pub connect_timeout_secs: u64,

    /// Retry policy for server-class failures.
    pub retry: RetryPolicy,

    /// Quota warning thresholds per bucket.
    pub rate_limits: RateLimitThresholds,

    /// Page size for listing endpoints (max 100).
    pub per_page: u32,

    /// Upper bound on pages fetched by one listing call.
    pub max_pages: u32,

    /// `User-Agent` header; GitHub rejects requests without one.
    pub user_agent: String,

    /// Use this API base instead of the one derived from the domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_override: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            retry: RetryPolicy::default(),
            rate_limits: RateLimitThresholds::default(),
            per_page: MAX_PER_PAGE,
            max_pages: 50,
            user_agent: concat!("issue-cache/", env!("CARGO_PKG_VERSION")).to_string(),
            api_base_override: None,
        }
    }
}

/// Derive the API base URL from a domain.
///
/// `github.com` maps to the public API host; anything else is treated as an
/// enterprise server serving the API under `/api/v3`.
pub fn api_base_for_domain(domain: &str) -> String {
    let domain = normalize_domain(domain);
    if domain == PUBLIC_DOMAIN {
        PUBLIC_API_BASE.to_string()
    } else {
        format!("https://{}/api/v3", domain)
    }
}

/// A normalized result plus the quota snapshot of the response that produced it.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub data: T,
    pub rate_limit: Option<RateLimitInfo>,

    /// A listing stopped at `max_pages` while more pages were advertised.
    pub truncated: bool,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, rate_limit: Option<RateLimitInfo>) -> Self {
        Self {
            data,
            rate_limit,
            truncated: false,
        }
    }
}

/// One decoded response.
struct Fetched<T> {
    data: T,
    rate_limit: Option<RateLimitInfo>,
    has_next: bool,
}

/// Query parameters for the issue search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchQuery {
    /// Composite query string with qualifiers.
    pub q: String,

    /// `created`, `updated` or `comments`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,

    /// `asc` or `desc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Total matches upstream; paging UIs use this, not `items.len()`.
    pub total_count: i64,

    /// Upstream gave up before scanning everything.
    pub incomplete_results: bool,

    pub items: Vec<IssueData>,
}

/// Authenticated account, returned by the connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub login: String,
    pub avatar_url: Option<String>,
}

/// User object from the API.
#[derive(Debug, Clone, Deserialize)]
struct GitHubUser {
    login: String,
    avatar_url: Option<String>,
}

/// Label object from the API.
#[derive(Debug, Clone, Deserialize)]
struct GitHubLabel {
    name: String,
    color: Option<String>,
}

/// Repository from the API.
#[derive(Debug, Clone, Deserialize)]
struct GitHubRepository {
    full_name: String,
    description: Option<String>,
    html_url: String,
    #[serde(default)]
    open_issues_count: i64,
}

/// Issue from the API. Pull requests come back from the issues endpoint too
/// and carry a `pull_request` object.
#[derive(Debug, Clone, Deserialize)]
struct GitHubIssue {
    number: i64,
    title: String,
    state: String,
    body: Option<String>,
    user: Option<GitHubUser>,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    #[serde(default)]
    assignees: Option<Vec<GitHubUser>>,
    #[serde(default)]
    comments: i64,
    html_url: String,
    created_at: String,
    updated_at: String,
    pull_request: Option<serde_json::Value>,
}

impl GitHubIssue {
    fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

/// Issue comment from the API.
#[derive(Debug, Clone, Deserialize)]
struct GitHubComment {
    id: i64,
    user: Option<GitHubUser>,
    body: Option<String>,
    created_at: String,
    updated_at: String,
}

/// Search response envelope.
#[derive(Debug, Clone, Deserialize)]
struct GitHubSearchResponse {
    total_count: i64,
    #[serde(default)]
    incomplete_results: bool,
    #[serde(default)]
    items: Vec<GitHubIssue>,
}

impl From<GitHubRepository> for RepositoryData {
    fn from(repo: GitHubRepository) -> Self {
        Self {
            full_name: repo.full_name,
            description: repo.description,
            html_url: repo.html_url,
            open_issues_count: repo.open_issues_count,
        }
    }
}

impl From<GitHubIssue> for IssueData {
    fn from(issue: GitHubIssue) -> Self {
        let (author_login, author_avatar_url) = match issue.user {
            Some(user) => (Some(user.login), user.avatar_url),
            None => (None, None),
        };

        Self {
            number: issue.number,
            title: issue.title,
            state: IssueState::from(issue.state.as_str()),
            body: issue.body,
            author_login,
            author_avatar_url,
            labels: issue
                .labels
                .into_iter()
                .map(|l| Label {
                    name: l.name,
                    color: l.color.unwrap_or_default(),
                })
                .collect(),
            assignees: issue
                .assignees
                .unwrap_or_default()
                .into_iter()
                .map(|u| Assignee {
                    login: u.login,
                    avatar_url: u.avatar_url,
                })
                .collect(),
            comments_count: issue.comments,
            html_url: issue.html_url,
            remote_created_at: parse_iso_timestamp(&issue.created_at),
            remote_updated_at: parse_iso_timestamp(&issue.updated_at),
        }
    }
}

impl From<GitHubComment> for CommentData {
    fn from(comment: GitHubComment) -> Self {
        let (author_login, author_avatar_url) = match comment.user {
            Some(user) => (Some(user.login), user.avatar_url),
            None => (None, None),
        };

        Self {
            remote_id: comment.id,
            author_login,
            author_avatar_url,
            body: comment.body.unwrap_or_default(),
            remote_created_at: parse_iso_timestamp(&comment.created_at),
            remote_updated_at: parse_iso_timestamp(&comment.updated_at),
        }
    }
}

/// Rate-limited, retrying GitHub client bound to one credential.
#[derive(Debug, Clone)]
pub struct RateLimitedClient {
    client: Client,
    config: ClientConfig,
    api_base: String,
    rate_limits: Arc<RateLimitTracker>,
}

impl RateLimitedClient {
    /// Create a client for a credential.
    ///
    /// Fails with [`AppError::Configuration`] before any network activity if
    /// the token or domain is empty.
    pub fn new(credential: &Credential, config: ClientConfig) -> Result<Self, AppError> {
        if credential.domain.trim().is_empty() {
            return Err(AppError::configuration("Remote domain is missing"));
        }
        if credential.token().trim().is_empty() {
            return Err(AppError::configuration(format!(
                "Access token for {} is empty",
                credential.domain
            )));
        }

        let mut headers = header::HeaderMap::new();
        let mut auth_value =
            header::HeaderValue::from_str(&format!("Bearer {}", credential.token().trim()))
                .map_err(|_| AppError::configuration("Invalid token format"))?;
        auth_value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        let api_base = config
            .api_base_override
            .clone()
            .unwrap_or_else(|| api_base_for_domain(&credential.domain));
        let rate_limits = Arc::new(RateLimitTracker::new(config.rate_limits));

        Ok(Self {
            client,
            config,
            api_base,
            rate_limits,
        })
    }

    /// Base URL all endpoints are resolved against.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Latest quota snapshot for a bucket.
    pub fn rate_limit(&self, bucket: QuotaBucket) -> Option<RateLimitInfo> {
        self.rate_limits.snapshot(bucket)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    fn repo_path(repo: &RepositoryRef) -> String {
        format!(
            "/repos/{}/{}",
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name)
        )
    }

    /// Perform a GET and decode the body, retrying server-class failures.
    ///
    /// Rate-limit failures return on the first attempt without sleeping.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        bucket: QuotaBucket,
    ) -> Result<Fetched<T>, AppError> {
        let url = self.api_url(endpoint);
        let url = url.as_str();
        let attempt = AtomicU32::new(0);
        let counter = &attempt;

        let fetch = move || {
            let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.get_once::<T>(url, endpoint, query, bucket, current)
        };

        let result = fetch
            .retry(self.config.retry.backoff())
            .notify(|err: &AppError, delay: Duration| {
                log::warn!(
                    "GET {} failed (attempt {}), retrying in {:?}: {}",
                    endpoint,
                    attempt.load(Ordering::SeqCst),
                    delay,
                    err
                );
            })
            .when(AppError::is_retryable)
            .await;

        if let Err(error) = &result {
            if error.is_rate_limited() {
                log::warn!("GET {} hit the rate limit: {}", endpoint, error);
            }
        }
        result
    }

    /// One attempt: send, classify, then read and decode the body.
    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        endpoint: &str,
        query: &[(&str, String)],
        bucket: QuotaBucket,
        attempt: u32,
    ) -> Result<Fetched<T>, AppError> {
        let response = self.client.get(url).query(query).send().await?;
        let rate_limit = self.rate_limits.observe(response.headers(), bucket);
        if !response.status().is_success() {
            return Err(Self::classify_failure(response, endpoint, rate_limit, attempt).await);
        }

        let has_next = has_next_page(response.headers());
        // Read errors, timeouts included, convert to `Network` and stay retryable.
        let body = response.bytes().await?;
        let data = serde_json::from_slice::<T>(&body)
            .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)))?;

        Ok(Fetched {
            data,
            rate_limit,
            has_next,
        })
    }

    /// Map a non-success response to an error variant.
    async fn classify_failure(
        response: Response,
        endpoint: &str,
        rate_limit: Option<RateLimitInfo>,
        attempt: u32,
    ) -> AppError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok());
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from));

        let quota_exhausted = rate_limit.as_ref().is_some_and(|info| info.remaining == 0);
        let mentions_rate_limit = body_message
            .as_deref()
            .is_some_and(|m| m.to_lowercase().contains("rate limit"));

        match status {
            StatusCode::UNAUTHORIZED => AppError::unauthorized(
                body_message.unwrap_or_else(|| "Bad credentials".to_string()),
            ),
            StatusCode::NOT_FOUND => AppError::not_found_with_id("resource", endpoint),
            StatusCode::TOO_MANY_REQUESTS => {
                AppError::rate_limited(reset_time(rate_limit.as_ref(), retry_after), rate_limit)
            }
            StatusCode::FORBIDDEN if quota_exhausted || mentions_rate_limit || retry_after.is_some() => {
                AppError::rate_limited(reset_time(rate_limit.as_ref(), retry_after), rate_limit)
            }
            StatusCode::FORBIDDEN => AppError::remote_api_full(
                body_message.unwrap_or_else(|| "Access denied".to_string()),
                status.as_u16(),
                endpoint,
            ),
            s if s.is_server_error() => AppError::server(
                body_message.unwrap_or_else(|| {
                    s.canonical_reason().unwrap_or("Server error").to_string()
                }),
                s.as_u16(),
                attempt,
            ),
            _ => AppError::remote_api_full(
                body_message.unwrap_or_else(|| format!("Request failed ({}): {}", status.as_u16(), body)),
                status.as_u16(),
                endpoint,
            ),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        bucket: QuotaBucket,
    ) -> Result<ApiResponse<T>, AppError> {
        let fetched = self.get_with_retry::<T>(endpoint, query, bucket).await?;
        Ok(ApiResponse::new(fetched.data, fetched.rate_limit))
    }

    /// Fetch every page of a listing endpoint, following `Link: rel="next"`.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse<Vec<T>>, AppError> {
        let per_page = self.config.per_page.clamp(1, MAX_PER_PAGE);
        let mut all_data = Vec::new();
        let mut rate_limit = None;
        let mut truncated = false;
        let mut page = 1u32;

        loop {
            let mut params: Vec<(&str, String)> = query.to_vec();
            params.push(("per_page", per_page.to_string()));
            params.push(("page", page.to_string()));

            let fetched = self
                .get_with_retry::<Vec<T>>(endpoint, &params, QuotaBucket::Core)
                .await?;
            rate_limit = fetched.rate_limit.or(rate_limit);
            all_data.extend(fetched.data);

            if !fetched.has_next {
                break;
            }
            if page >= self.config.max_pages {
                log::warn!(
                    "Stopped paging {} after {} pages ({} items)",
                    endpoint,
                    page,
                    all_data.len()
                );
                truncated = true;
                break;
            }
            page += 1;
        }

        Ok(ApiResponse {
            data: all_data,
            rate_limit,
            truncated,
        })
    }

    /// Verify the credential by fetching the authenticated user.
    pub async fn test_connection(&self) -> Result<ApiResponse<RemoteUser>, AppError> {
        let response = self
            .get_json::<GitHubUser>("/user", &[], QuotaBucket::Core)
            .await?;
        Ok(ApiResponse::new(
            RemoteUser {
                login: response.data.login,
                avatar_url: response.data.avatar_url,
            },
            response.rate_limit,
        ))
    }

    /// Fetch repository metadata.
    pub async fn get_repository(
        &self,
        repo: &RepositoryRef,
    ) -> Result<ApiResponse<RepositoryData>, AppError> {
        let response = self
            .get_json::<GitHubRepository>(&Self::repo_path(repo), &[], QuotaBucket::Core)
            .await?;
        Ok(ApiResponse::new(response.data.into(), response.rate_limit))
    }

    /// Fetch every issue (open and closed) of a repository, pull requests excluded.
    pub async fn list_issues(
        &self,
        repo: &RepositoryRef,
    ) -> Result<ApiResponse<Vec<IssueData>>, AppError> {
        let endpoint = format!("{}/issues", Self::repo_path(repo));
        let response = self
            .get_all_pages::<GitHubIssue>(&endpoint, &[("state", "all".to_string())])
            .await?;
        Ok(ApiResponse {
            data: response
                .data
                .into_iter()
                .filter(|issue| !issue.is_pull_request())
                .map(IssueData::from)
                .collect(),
            rate_limit: response.rate_limit,
            truncated: response.truncated,
        })
    }

    /// Fetch one issue by number.
    pub async fn get_issue(
        &self,
        repo: &RepositoryRef,
        number: i64,
    ) -> Result<ApiResponse<IssueData>, AppError> {
        let endpoint = format!("{}/issues/{}", Self::repo_path(repo), number);
        let response = self
            .get_json::<GitHubIssue>(&endpoint, &[], QuotaBucket::Core)
            .await?;
        if response.data.is_pull_request() {
            return Err(AppError::not_found_with_id("issue", number.to_string()));
        }
        Ok(ApiResponse::new(response.data.into(), response.rate_limit))
    }

    /// Fetch every comment of an issue.
    pub async fn list_comments(
        &self,
        repo: &RepositoryRef,
        number: i64,
    ) -> Result<ApiResponse<Vec<CommentData>>, AppError> {
        let endpoint = format!("{}/issues/{}/comments", Self::repo_path(repo), number);
        let response = self.get_all_pages::<GitHubComment>(&endpoint, &[]).await?;
        Ok(ApiResponse {
            data: response.data.into_iter().map(CommentData::from).collect(),
            rate_limit: response.rate_limit,
            truncated: response.truncated,
        })
    }

    /// Run an issue search against the search quota bucket.
    pub async fn search_issues(
        &self,
        query: &SearchQuery,
    ) -> Result<ApiResponse<SearchPage>, AppError> {
        let mut params: Vec<(&str, String)> = vec![("q", query.q.clone())];
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(order) = &query.order {
            params.push(("order", order.clone()));
        }
        if let Some(page) = query.page {
            params.push(("page", page.max(1).to_string()));
        }
        if let Some(per_page) = query.per_page {
            params.push(("per_page", per_page.clamp(1, MAX_PER_PAGE).to_string()));
        }

        let response = self
            .get_json::<GitHubSearchResponse>("/search/issues", &params, QuotaBucket::Search)
            .await?;
        let page = response.data;
        Ok(ApiResponse::new(
            SearchPage {
                total_count: page.total_count,
                incomplete_results: page.incomplete_results,
                items: page
                    .items
                    .into_iter()
                    .filter(|issue| !issue.is_pull_request())
                    .map(IssueData::from)
                    .collect(),
            },
            response.rate_limit,
        ))
    }
}

/// When a rate-limited caller may try again.
///
/// An exhausted bucket resets at its reported reset time; otherwise a
/// `Retry-After` header wins, and a minute is assumed when neither is known.
fn reset_time(rate_limit: Option<&RateLimitInfo>, retry_after_secs: Option<i64>) -> DateTime<Utc> {
    match (rate_limit, retry_after_secs) {
        (Some(info), _) if info.remaining == 0 => info.resets_at,
        (_, Some(secs)) => Utc::now() + ChronoDuration::seconds(secs.max(0)),
        (Some(info), None) => info.resets_at,
        (None, None) => Utc::now() + ChronoDuration::seconds(60),
    }
}

/// Whether a `Link` header advertises a next page.
fn has_next_page(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::LINK)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|link| {
            link.split(',')
                .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\""))
        })
}

/// Parse ISO 8601 timestamp to Unix timestamp.
fn parse_iso_timestamp(s: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}
