//! Shared fixtures: an in-process fake of the GitHub REST API and helpers
//! for building an [`AppContext`] that points at it.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use issue_cache::models::repository::RepositoryRef;
use issue_cache::services::credentials::StaticCredentialProvider;
use issue_cache::services::remote_client::{ClientConfig, RetryPolicy};
use issue_cache::settings::AppSettings;
use issue_cache::AppContext;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const USER_ID: i64 = 1;
pub const DOMAIN: &str = "github.com";
pub const TOKEN: &str = "ghp_test_token";

/// Reset instant reported by the fake (far in the future).
pub const RESET_EPOCH: i64 = 4_102_444_800;

/// Retry delay base used by tests, in milliseconds.
pub const TEST_BASE_DELAY_MS: u64 = 10;

pub fn repo_ref() -> RepositoryRef {
    RepositoryRef::new(USER_ID, DOMAIN, "acme", "widgets")
}

/// Mutable behavior of the fake server.
#[derive(Default)]
pub struct FakeState {
    pub repository: Mutex<Value>,
    pub issues: Mutex<Vec<Value>>,
    pub comments: Mutex<HashMap<i64, Vec<Value>>>,
    /// Issue numbers whose comment listing answers 500.
    pub failing_comments: Mutex<HashSet<i64>>,
    /// Forced status for the issue listing.
    pub issues_status: Mutex<Option<u16>>,
    pub search_items: Mutex<Vec<Value>>,
    /// Forced status for the search endpoint.
    pub search_status: Mutex<Option<u16>>,
    /// `/user` answers 502 this many times before succeeding.
    pub user_failures: Mutex<u32>,
    /// Forced status for `/user` after the failures above.
    pub user_status: Mutex<Option<u16>>,
    /// Requests per route name.
    pub hits: Mutex<HashMap<&'static str, u32>>,
    /// `q` parameter of each search request.
    pub search_queries: Mutex<Vec<HashMap<String, String>>>,
    /// Authorization headers seen.
    pub auth_headers: Mutex<Vec<String>>,
}

impl FakeState {
    fn hit(&self, route: &'static str, headers: &HeaderMap) {
        *self.hits.lock().unwrap().entry(route).or_insert(0) += 1;
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.auth_headers.lock().unwrap().push(auth.to_string());
        }
    }

    pub fn hits(&self, route: &str) -> u32 {
        self.hits.lock().unwrap().get(route).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> u32 {
        self.hits.lock().unwrap().values().sum()
    }

    pub fn set_issues(&self, issues: Vec<Value>) {
        *self.issues.lock().unwrap() = issues;
    }

    pub fn set_comments(&self, number: i64, comments: Vec<Value>) {
        self.comments.lock().unwrap().insert(number, comments);
    }
}

/// Running fake server.
pub struct FakeGitHub {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

impl FakeGitHub {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        *state.repository.lock().unwrap() = repository_json();

        let app = Router::new()
            .route("/user", get(get_user))
            .route("/repos/{owner}/{name}", get(get_repository))
            .route("/repos/{owner}/{name}/issues", get(list_issues))
            .route("/repos/{owner}/{name}/issues/{number}", get(get_issue))
            .route(
                "/repos/{owner}/{name}/issues/{number}/comments",
                get(list_comments),
            )
            .route("/search/issues", get(search_issues))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Client settings pointing at this server with short retry delays.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_base_override: Some(self.base_url.clone()),
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: TEST_BASE_DELAY_MS,
            },
            ..ClientConfig::default()
        }
    }

    /// Context with a token for [`USER_ID`] on [`DOMAIN`] and a fresh database.
    pub async fn context(&self) -> (TempDir, AppContext) {
        let credentials = StaticCredentialProvider::new().with_token(USER_ID, DOMAIN, TOKEN);
        self.context_with(credentials).await
    }

    pub async fn context_with(&self, credentials: StaticCredentialProvider) -> (TempDir, AppContext) {
        build_context(self.client_config(), credentials).await
    }

    /// Context with the usual token but custom client settings.
    pub async fn context_with_client(&self, client: ClientConfig) -> (TempDir, AppContext) {
        let credentials = StaticCredentialProvider::new().with_token(USER_ID, DOMAIN, TOKEN);
        build_context(client, credentials).await
    }
}

async fn build_context(client: ClientConfig, credentials: StaticCredentialProvider) -> (TempDir, AppContext) {
    let dir = tempfile::tempdir().unwrap();
    let settings = AppSettings {
        client,
        database_path: dir.path().join("issue-cache.db"),
        ..AppSettings::default()
    };
    let ctx = AppContext::initialize(settings, Arc::new(credentials))
        .await
        .unwrap();
    (dir, ctx)
}

/// Bare HTTP server answering every request with `body`. The first `stalls`
/// connections get the headers and half the body, then nothing.
pub struct StallingServer {
    pub base_url: String,
    pub connections: Arc<AtomicU32>,
}

impl StallingServer {
    pub async fn start(stalls: u32, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicU32::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(async move {
                    let mut request = [0u8; 4096];
                    let _ = socket.read(&mut request).await;

                    let head = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    if n <= stalls {
                        let _ = socket.write_all(&body.as_bytes()[..body.len() / 2]).await;
                        let _ = socket.flush().await;
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    } else {
                        let _ = socket.write_all(body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            connections,
        }
    }

    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// One-second timeout and short retry delays.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_base_override: Some(self.base_url.clone()),
            timeout_secs: 1,
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: TEST_BASE_DELAY_MS,
            },
            ..ClientConfig::default()
        }
    }
}

fn rate_headers(resource: &str, limit: u32, remaining: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(RESET_EPOCH));
    headers.insert("x-ratelimit-resource", HeaderValue::from_str(resource).unwrap());
    headers
}

fn core_headers() -> HeaderMap {
    rate_headers("core", 5000, 4990)
}

/// Error response in the API's shape. 403/429 report an exhausted bucket.
fn error_response(status: u16, resource: &str, limit: u32) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    let (headers, message) = match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => (
            rate_headers(resource, limit, 0),
            "API rate limit exceeded for user ID 1.",
        ),
        StatusCode::UNAUTHORIZED => (rate_headers(resource, limit, limit - 1), "Bad credentials"),
        _ => (rate_headers(resource, limit, limit - 1), "Server Error"),
    };
    (status, headers, Json(json!({ "message": message }))).into_response()
}

async fn get_user(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    state.hit("user", &headers);
    {
        let mut failures = state.user_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return error_response(502, "core", 5000);
        }
    }
    if let Some(status) = *state.user_status.lock().unwrap() {
        return error_response(status, "core", 5000);
    }
    (
        core_headers(),
        Json(json!({ "login": "octocat", "avatar_url": "https://avatars.example/octocat" })),
    )
        .into_response()
}

async fn get_repository(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    state.hit("repository", &headers);
    let repository = state.repository.lock().unwrap().clone();
    (core_headers(), Json(repository)).into_response()
}

async fn list_issues(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.hit("issues", &headers);
    if let Some(status) = *state.issues_status.lock().unwrap() {
        return error_response(status, "core", 5000);
    }

    let per_page: usize = params.get("per_page").and_then(|v| v.parse().ok()).unwrap_or(30);
    let page: usize = params.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let issues = state.issues.lock().unwrap().clone();

    let start = (page - 1) * per_page;
    let items: Vec<Value> = issues.iter().skip(start).take(per_page).cloned().collect();

    let mut response_headers = core_headers();
    if start + per_page < issues.len() {
        let link = format!(
            "<http://fake/repos/acme/widgets/issues?page={}>; rel=\"next\", <http://fake/repos/acme/widgets/issues?page=1>; rel=\"first\"",
            page + 1
        );
        response_headers.insert("link", HeaderValue::from_str(&link).unwrap());
    }
    (response_headers, Json(Value::Array(items))).into_response()
}

async fn get_issue(
    State(state): State<Arc<FakeState>>,
    Path((_owner, _name, number)): Path<(String, String, i64)>,
    headers: HeaderMap,
) -> Response {
    state.hit("issue", &headers);
    let issue = state
        .issues
        .lock()
        .unwrap()
        .iter()
        .find(|i| i["number"] == number)
        .cloned();
    match issue {
        Some(issue) => (core_headers(), Json(issue)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            core_headers(),
            Json(json!({ "message": "Not Found" })),
        )
            .into_response(),
    }
}

async fn list_comments(
    State(state): State<Arc<FakeState>>,
    Path((_owner, _name, number)): Path<(String, String, i64)>,
    headers: HeaderMap,
) -> Response {
    state.hit("comments", &headers);
    if state.failing_comments.lock().unwrap().contains(&number) {
        return error_response(500, "core", 5000);
    }
    let comments = state
        .comments
        .lock()
        .unwrap()
        .get(&number)
        .cloned()
        .unwrap_or_default();
    (core_headers(), Json(Value::Array(comments))).into_response()
}

async fn search_issues(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.hit("search", &headers);
    state.search_queries.lock().unwrap().push(params);
    if let Some(status) = *state.search_status.lock().unwrap() {
        return error_response(status, "search", 30);
    }

    let items = state.search_items.lock().unwrap().clone();
    (
        rate_headers("search", 30, 27),
        Json(json!({
            "total_count": items.len(),
            "incomplete_results": false,
            "items": items,
        })),
    )
        .into_response()
}

pub fn repository_json() -> Value {
    json!({
        "id": 1296269,
        "full_name": "acme/widgets",
        "description": "Widgets for everyone",
        "html_url": "https://github.com/acme/widgets",
        "open_issues_count": 2,
    })
}

pub fn issue_json(number: i64, title: &str, state: &str, labels: &[&str], comments: i64) -> Value {
    json!({
        "number": number,
        "title": title,
        "state": state,
        "body": format!("Details for issue {}", number),
        "user": { "login": "octocat", "avatar_url": "https://avatars.example/octocat" },
        "labels": labels
            .iter()
            .map(|name| json!({ "name": name, "color": "d73a4a" }))
            .collect::<Vec<_>>(),
        "assignees": [],
        "comments": comments,
        "html_url": format!("https://github.com/acme/widgets/issues/{}", number),
        "created_at": format!("2024-01-{:02}T10:00:00Z", number.clamp(1, 28)),
        "updated_at": format!("2024-02-{:02}T10:00:00Z", number.clamp(1, 28)),
    })
}

pub fn pull_request_json(number: i64) -> Value {
    let mut value = issue_json(number, "A pull request", "open", &[], 0);
    value["pull_request"] = json!({ "url": format!("https://api.github.com/repos/acme/widgets/pulls/{}", number) });
    value
}

pub fn comment_json(id: i64, body: &str) -> Value {
    json!({
        "id": id,
        "user": { "login": "reviewer", "avatar_url": null },
        "body": body,
        "created_at": "2024-03-01T09:00:00Z",
        "updated_at": "2024-03-01T09:00:00Z",
    })
}

/// Three issues: two open bugs with 3 and 10 comments, one closed bug.
pub fn seed_three_issues(state: &FakeState) {
    state.set_issues(vec![
        issue_json(1, "Crash on start", "open", &["bug"], 3),
        issue_json(2, "Memory leak", "open", &["bug", "needs review"], 10),
        issue_json(3, "Old regression", "closed", &["bug"], 1),
    ]);
    state.set_comments(1, vec![comment_json(101, "Seen it too"), comment_json(102, "Same")]);
    state.set_comments(2, vec![comment_json(201, "Profiling now")]);
    state.set_comments(3, vec![]);
}
