//! Business logic services.
//!
//! - `remote_client`: rate-limited, retrying GitHub REST client
//! - `rate_limit`: per-bucket quota snapshots and thresholds
//! - `credentials`: token lookup per user and domain
//! - `sync_engine`: transactional refresh of the local store
//! - `search`: local and remote issue search

pub mod credentials;
pub mod rate_limit;
pub mod remote_client;
pub mod search;
pub mod sync_engine;

pub use credentials::{CredentialProvider, KeyringCredentialProvider, StaticCredentialProvider};
pub use remote_client::RateLimitedClient;
pub use search::SearchEngine;
pub use sync_engine::SyncEngine;
