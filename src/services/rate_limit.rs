//! Rate-limit bookkeeping for the remote API.
//!
//! GitHub reports quota state on every response through `x-ratelimit-*`
//! headers. The search endpoint draws from its own, much smaller bucket, so
//! snapshots and warning thresholds are kept per bucket.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Independently rate-limited category of remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaBucket {
    /// Regular REST reads (repository, issues, comments, user).
    Core,
    /// `/search/*` endpoints.
    Search,
}

impl QuotaBucket {
    /// Map an `x-ratelimit-resource` value to a bucket.
    pub fn from_resource(resource: &str) -> Self {
        match resource.trim().to_lowercase().as_str() {
            "search" | "code_search" => Self::Search,
            _ => Self::Core,
        }
    }
}

impl std::fmt::Display for QuotaBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Search => write!(f, "search"),
        }
    }
}

/// How close a bucket is to running out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaLevel {
    Ok,
    Warning,
    Critical,
    Exhausted,
}

/// Warning and critical thresholds for one bucket, in remaining requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketThresholds {
    pub warning: u32,
    pub critical: u32,
}

impl BucketThresholds {
    /// Classify a remaining-request count.
    pub fn level(&self, remaining: u32) -> QuotaLevel {
        if remaining == 0 {
            QuotaLevel::Exhausted
        } else if remaining <= self.critical {
            QuotaLevel::Critical
        } else if remaining <= self.warning {
            QuotaLevel::Warning
        } else {
            QuotaLevel::Ok
        }
    }
}

/// Per-bucket thresholds. Injected through the client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitThresholds {
    pub core: BucketThresholds,
    pub search: BucketThresholds,
}

impl Default for RateLimitThresholds {
    fn default() -> Self {
        Self {
            // 5000/hour for authenticated core reads
            core: BucketThresholds {
                warning: 500,
                critical: 100,
            },
            // 30/minute for search
            search: BucketThresholds {
                warning: 5,
                critical: 1,
            },
        }
    }
}

impl RateLimitThresholds {
    /// Thresholds for a bucket.
    pub fn for_bucket(&self, bucket: QuotaBucket) -> BucketThresholds {
        match bucket {
            QuotaBucket::Core => self.core,
            QuotaBucket::Search => self.search,
        }
    }
}

/// Quota snapshot taken from one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Bucket the snapshot belongs to.
    pub bucket: QuotaBucket,
    /// Maximum requests allowed per window.
    pub limit: u32,
    /// Remaining requests in the current window.
    pub remaining: u32,
    /// When the window resets.
    pub resets_at: DateTime<Utc>,
    /// Classification against the configured thresholds.
    pub level: QuotaLevel,
}

impl RateLimitInfo {
    /// Whether the caller should show a quota warning.
    pub fn needs_attention(&self) -> bool {
        self.level >= QuotaLevel::Warning
    }
}

/// Parse `x-ratelimit-*` headers.
///
/// Returns `None` when the limit or remaining headers are missing. The
/// bucket comes from `x-ratelimit-resource` when present, else `fallback`.
pub fn parse_rate_limit_headers(
    headers: &HeaderMap,
    thresholds: &RateLimitThresholds,
    fallback: QuotaBucket,
) -> Option<RateLimitInfo> {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let limit: u32 = get("x-ratelimit-limit")?.trim().parse().ok()?;
    let remaining: u32 = get("x-ratelimit-remaining")?.trim().parse().ok()?;
    let resets_at = get("x-ratelimit-reset")
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        .unwrap_or_else(Utc::now);
    let bucket = get("x-ratelimit-resource")
        .map(QuotaBucket::from_resource)
        .unwrap_or(fallback);

    Some(RateLimitInfo {
        bucket,
        limit,
        remaining,
        resets_at,
        level: thresholds.for_bucket(bucket).level(remaining),
    })
}

/// Latest quota snapshot per bucket.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    thresholds: RateLimitThresholds,
    snapshots: Mutex<HashMap<QuotaBucket, RateLimitInfo>>,
}

impl RateLimitTracker {
    /// Create a tracker with the given thresholds.
    pub fn new(thresholds: RateLimitThresholds) -> Self {
        Self {
            thresholds,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Parse headers and remember the snapshot for its bucket.
    pub fn observe(&self, headers: &HeaderMap, fallback: QuotaBucket) -> Option<RateLimitInfo> {
        let info = parse_rate_limit_headers(headers, &self.thresholds, fallback)?;
        if info.needs_attention() {
            log::warn!(
                "Rate limit {} bucket at {}/{} ({:?}), resets at {}",
                info.bucket,
                info.remaining,
                info.limit,
                info.level,
                info.resets_at
            );
        }
        self.record(info.clone());
        Some(info)
    }

    fn record(&self, info: RateLimitInfo) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.insert(info.bucket, info);
    }

    /// Latest snapshot for a bucket, if any response has reported one.
    pub fn snapshot(&self, bucket: QuotaBucket) -> Option<RateLimitInfo> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.get(&bucket).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_core_headers() {
        let map = headers(&[
            ("x-ratelimit-limit", "5000"),
            ("x-ratelimit-remaining", "4999"),
            ("x-ratelimit-reset", "1700000000"),
            ("x-ratelimit-resource", "core"),
        ]);
        let info =
            parse_rate_limit_headers(&map, &RateLimitThresholds::default(), QuotaBucket::Search)
                .unwrap();

        assert_eq!(info.bucket, QuotaBucket::Core);
        assert_eq!(info.limit, 5000);
        assert_eq!(info.remaining, 4999);
        assert_eq!(info.resets_at.timestamp(), 1_700_000_000);
        assert_eq!(info.level, QuotaLevel::Ok);
    }

    #[test]
    fn test_missing_headers_yield_none() {
        let map = headers(&[("x-ratelimit-limit", "5000")]);
        assert!(
            parse_rate_limit_headers(&map, &RateLimitThresholds::default(), QuotaBucket::Core)
                .is_none()
        );
    }

    #[test]
    fn test_search_bucket_uses_lower_thresholds() {
        let thresholds = RateLimitThresholds::default();

        // 20 remaining is fine for search but would be critical for core
        assert_eq!(thresholds.search.level(20), QuotaLevel::Ok);
        assert_eq!(thresholds.core.level(20), QuotaLevel::Critical);

        assert_eq!(thresholds.search.level(4), QuotaLevel::Warning);
        assert_eq!(thresholds.search.level(1), QuotaLevel::Critical);
        assert_eq!(thresholds.search.level(0), QuotaLevel::Exhausted);
    }

    #[test]
    fn test_fallback_bucket_when_resource_missing() {
        let map = headers(&[
            ("x-ratelimit-limit", "30"),
            ("x-ratelimit-remaining", "3"),
            ("x-ratelimit-reset", "1700000000"),
        ]);
        let info =
            parse_rate_limit_headers(&map, &RateLimitThresholds::default(), QuotaBucket::Search)
                .unwrap();
        assert_eq!(info.bucket, QuotaBucket::Search);
        assert_eq!(info.level, QuotaLevel::Warning);
        assert!(info.needs_attention());
    }

    #[test]
    fn test_tracker_keeps_buckets_apart() {
        let thresholds = RateLimitThresholds {
            core: BucketThresholds {
                warning: 10,
                critical: 2,
            },
            ..RateLimitThresholds::default()
        };
        let tracker = RateLimitTracker::new(thresholds);

        tracker.observe(
            &headers(&[
                ("x-ratelimit-limit", "5000"),
                ("x-ratelimit-remaining", "8"),
                ("x-ratelimit-reset", "1700000000"),
                ("x-ratelimit-resource", "core"),
            ]),
            QuotaBucket::Core,
        );
        tracker.observe(
            &headers(&[
                ("x-ratelimit-limit", "30"),
                ("x-ratelimit-remaining", "29"),
                ("x-ratelimit-reset", "1700000060"),
                ("x-ratelimit-resource", "search"),
            ]),
            QuotaBucket::Core,
        );

        let core = tracker.snapshot(QuotaBucket::Core).unwrap();
        let search = tracker.snapshot(QuotaBucket::Search).unwrap();
        assert_eq!(core.remaining, 8);
        assert_eq!(core.level, QuotaLevel::Warning);
        assert_eq!(search.remaining, 29);
        assert_eq!(search.level, QuotaLevel::Ok);
    }
}
