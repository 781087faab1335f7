//! Search commands.

use super::AppContext;
use crate::models::repository::RepositoryRef;
use crate::services::search::{SearchFailure, SearchMode, SearchRequest, SearchResults};
use serde::Serialize;

/// Results plus the remote failure that caused a fallback, if any.
#[derive(Debug, Serialize)]
pub struct FallbackResults {
    pub results: SearchResults,
    /// Set when the remote search failed and `results` came from the cache.
    pub remote_error: Option<SearchFailure>,
}

impl FallbackResults {
    /// Whether these results came from the cache after a remote failure.
    pub fn is_fallback(&self) -> bool {
        self.remote_error.is_some()
    }
}

/// Run one search in the mode the request names.
pub async fn search_issues(
    ctx: &AppContext,
    repo_ref: &RepositoryRef,
    request: &SearchRequest,
) -> Result<SearchResults, SearchFailure> {
    ctx.search_engine().search(repo_ref, request).await
}

/// Search remotely, falling back to the cache with the same filters and
/// sort when the remote search fails.
///
/// Local requests run once. The error is returned only when the local
/// search fails too.
pub async fn search_with_fallback(
    ctx: &AppContext,
    repo_ref: &RepositoryRef,
    request: &SearchRequest,
) -> Result<FallbackResults, SearchFailure> {
    let engine = ctx.search_engine();

    let remote_error = match engine.search(repo_ref, request).await {
        Ok(results) => {
            return Ok(FallbackResults {
                results,
                remote_error: None,
            })
        }
        Err(failure) if failure.mode == SearchMode::Remote => failure,
        Err(failure) => return Err(failure),
    };

    log::warn!(
        "Remote search for {} failed, serving cached results: {}",
        repo_ref.full_name(),
        remote_error.message
    );

    let results = engine
        .search(repo_ref, &request.with_mode(SearchMode::Local))
        .await?;

    Ok(FallbackResults {
        results,
        remote_error: Some(remote_error),
    })
}
