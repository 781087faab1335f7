//! Credential lookup for remote hosts.
//!
//! Tokens are stored per local user and per domain. The sync and search
//! layers only ever read them through [`CredentialProvider`]; they are never
//! written to the local store and never logged.

use crate::error::AppError;
use crate::models::repository::normalize_domain;
use keyring::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

/// Service name used in the keychain.
const SERVICE_NAME: &str = "issue-cache";

/// Token for one domain.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Normalized host domain the token is valid for.
    pub domain: String,
    token: String,
}

impl Credential {
    /// Create a credential for a domain.
    pub fn new(domain: impl AsRef<str>, token: impl Into<String>) -> Self {
        Self {
            domain: normalize_domain(domain.as_ref()),
            token: token.into(),
        }
    }

    /// The secret itself.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("domain", &self.domain)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolves the credential a user has configured for a domain.
pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` when the user has no credential for the domain.
    fn credential_for(&self, user_id: i64, domain: &str) -> Result<Option<Credential>, AppError>;
}

/// Credentials held in memory, for embedding callers and tests.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    tokens: RwLock<HashMap<(i64, String), String>>,
}

impl StaticCredentialProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_token(self, user_id: i64, domain: &str, token: impl Into<String>) -> Self {
        self.insert(user_id, domain, token);
        self
    }

    /// Add or replace a token.
    pub fn insert(&self, user_id: i64, domain: &str, token: impl Into<String>) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert((user_id, normalize_domain(domain)), token.into());
    }

    /// Remove a token.
    pub fn remove(&self, user_id: i64, domain: &str) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&(user_id, normalize_domain(domain)));
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential_for(&self, user_id: i64, domain: &str) -> Result<Option<Credential>, AppError> {
        let domain = normalize_domain(domain);
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        Ok(tokens
            .get(&(user_id, domain.clone()))
            .map(|token| Credential::new(&domain, token.clone())))
    }
}

/// Credentials stored in the OS keychain (Keychain on macOS, Credential
/// Manager on Windows, Secret Service on Linux).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringCredentialProvider;

impl KeyringCredentialProvider {
    /// Store a token for a user and domain.
    pub fn store_token(&self, user_id: i64, domain: &str, token: &str) -> Result<(), AppError> {
        let entry = Self::get_entry(user_id, domain)?;

        entry
            .set_password(token)
            .map_err(|e| AppError::credential(format!("Failed to store token: {}", e)))
    }

    /// Delete a token. Deleting a missing token is not an error.
    pub fn delete_token(&self, user_id: i64, domain: &str) -> Result<(), AppError> {
        let entry = Self::get_entry(user_id, domain)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::credential(format!(
                "Failed to delete token: {}",
                e
            ))),
        }
    }

    /// Create a keyring entry for the given user and domain.
    fn get_entry(user_id: i64, domain: &str) -> Result<Entry, AppError> {
        Entry::new(SERVICE_NAME, &account_name(user_id, domain)).map_err(|e| {
            AppError::credential(format!("Failed to create keyring entry: {}", e))
        })
    }
}

impl CredentialProvider for KeyringCredentialProvider {
    fn credential_for(&self, user_id: i64, domain: &str) -> Result<Option<Credential>, AppError> {
        let entry = Self::get_entry(user_id, domain)?;

        match entry.get_password() {
            Ok(token) => Ok(Some(Credential::new(domain, token))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::credential(format!(
                "Failed to retrieve token: {}",
                e
            ))),
        }
    }
}

/// Keychain account name: `<user_id>@<domain>`.
fn account_name(user_id: i64, domain: &str) -> String {
    format!("{}@{}", user_id, normalize_domain(domain))
}
