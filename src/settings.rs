//! Application settings persisted as a JSON file.
//!
//! Missing keys fall back to their defaults, so older settings files keep
//! loading after new options are added.

use crate::db::pool::PoolConfig;
use crate::error::AppError;
use crate::services::remote_client::ClientConfig;
use crate::services::sync_engine::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings filename inside the data directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Remote client: timeouts, retries, quota thresholds.
    pub client: ClientConfig,

    /// Sync staleness.
    pub sync: SyncConfig,

    /// Local store connection pool.
    pub storage: PoolConfig,

    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            sync: SyncConfig::default(),
            storage: PoolConfig::default(),
            database_path: crate::db::get_db_path(Path::new(".")),
        }
    }
}

/// Path to the settings file inside a data directory.
pub fn get_settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

/// Load settings, using defaults if the file does not exist.
pub fn load_settings(path: &Path) -> Result<AppSettings, AppError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(AppSettings::default());
        }
        Err(e) => {
            return Err(AppError::configuration(format!(
                "Failed to read settings from {}: {}",
                path.display(),
                e
            )))
        }
    };

    serde_json::from_str(&contents).map_err(|e| {
        AppError::configuration(format!("Invalid settings in {}: {}", path.display(), e))
    })
}

/// Save settings, creating the parent directory if needed.
pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::configuration(format!("Failed to create settings directory: {}", e))
        })?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json).map_err(|e| {
        AppError::configuration(format!(
            "Failed to write settings to {}: {}",
            path.display(),
            e
        ))
    })
}
