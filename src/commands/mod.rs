//! Entry points for callers (a controller, CLI, or IPC layer).
//!
//! Commands take an [`AppContext`] and return serializable results:
//! - `sync`: refresh the cache and report its state
//! - `search`: local or remote search, with fallback to the cache

pub mod search;
pub mod sync;

use crate::db::{self, pool::DbPool};
use crate::error::AppError;
use crate::services::credentials::CredentialProvider;
use crate::services::search::SearchEngine;
use crate::services::sync_engine::SyncEngine;
use crate::settings::AppSettings;
use std::sync::Arc;

pub use search::{search_issues, search_with_fallback, FallbackResults};
pub use sync::{ensure_fresh, get_sync_log, get_sync_status, sync_issues, GetSyncStatusResponse};

/// Shared state handed to every command.
#[derive(Clone)]
pub struct AppContext {
    pub pool: DbPool,
    pub credentials: Arc<dyn CredentialProvider>,
    pub settings: AppSettings,
}

impl AppContext {
    pub fn new(pool: DbPool, credentials: Arc<dyn CredentialProvider>, settings: AppSettings) -> Self {
        Self {
            pool,
            credentials,
            settings,
        }
    }

    /// Open the database named in the settings and run migrations.
    pub async fn initialize(
        settings: AppSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, AppError> {
        let pool = db::initialize_with(&settings.database_path, &settings.storage).await?;
        log::info!("Opened issue cache at {}", settings.database_path.display());
        Ok(Self::new(pool, credentials, settings))
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.pool.clone(),
            self.credentials.clone(),
            self.settings.client.clone(),
            self.settings.sync.clone(),
        )
    }

    pub fn search_engine(&self) -> SearchEngine {
        SearchEngine::new(
            self.pool.clone(),
            self.credentials.clone(),
            self.settings.client.clone(),
        )
    }
}
