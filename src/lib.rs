//! Issue Cache - local-first issue browsing for GitHub repositories.
//!
//! Keeps a per-user SQLite cache of repositories, issues and comments,
//! refreshed synchronously from the GitHub REST API, and answers searches
//! either from that cache or from the remote search endpoint.

pub mod commands;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod settings;

pub use commands::AppContext;
pub use error::AppError;
