//! Session credential storage
//!
//! Credentials are kept in an ordered chain of backends:
//!
//! 1. [`keyring_store::KeyringStore`] - the platform secret service
//! 2. [`encrypted_store::EncryptedFileStore`] - an AES-256-GCM file in the config directory
//! 3. [`env_store::EnvironmentStore`] - read-only, from `IGSCRAPER_SESSION_ID` and friends
//!
//! [`CredentialManager`] walks the chain. Writes go to the first backend that
//! accepts them, reads return the first hit, listings are merged keeping the
//! most recently modified copy of each account, and deletes hit every backend.
//!
//! Token values are never logged. [`Account`]'s `Debug` output and
//! [`Account::sanitized`] mask them to `abcd...wxyz`.

pub mod encrypted_store;
pub mod env_store;
pub mod keyring_store;

pub use encrypted_store::EncryptedFileStore;
pub use env_store::EnvironmentStore;
pub use keyring_store::KeyringStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Stored session credentials for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account username (the key)
    pub username: String,
    /// `sessionid` cookie value
    pub session_id: String,
    /// `csrftoken` cookie value
    pub csrf_token: String,
    /// Browser user agent to send, if the default should be overridden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// When this record was last written
    pub last_modified: DateTime<Utc>,
}

impl Account {
    /// Build an account stamped with the current time
    pub fn new(
        username: impl Into<String>,
        session_id: impl Into<String>,
        csrf_token: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            session_id: session_id.into(),
            csrf_token: csrf_token.into(),
            user_agent: None,
            last_modified: Utc::now(),
        }
    }

    /// Attach a user agent
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent.filter(|ua| !ua.trim().is_empty());
        self
    }

    /// Check required fields are present
    pub fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("username is required".to_string());
        }
        if self.session_id.trim().is_empty() {
            return Err("session ID is required".to_string());
        }
        if self.csrf_token.trim().is_empty() {
            return Err("CSRF token is required".to_string());
        }
        Ok(())
    }

    /// Copy with token fields masked, safe to log or print
    pub fn sanitized(&self) -> Self {
        Self {
            username: self.username.clone(),
            session_id: mask_secret(&self.session_id),
            csrf_token: mask_secret(&self.csrf_token),
            user_agent: self.user_agent.clone(),
            last_modified: self.last_modified,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("session_id", &mask_secret(&self.session_id))
            .field("csrf_token", &mask_secret(&self.csrf_token))
            .field("user_agent", &self.user_agent)
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

/// Mask all but the first and last four characters.
///
/// Values of eight characters or fewer are fully masked.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Credential storage errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    /// Missing username or token
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// No backend holds this account
    #[error("credentials not found for user: {0}")]
    NotFound(String),

    /// Backend refuses the operation (read-only, unavailable)
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),

    /// Encrypted file was tampered with or the passphrase is wrong
    #[error("failed to decrypt credential file: {0}")]
    DecryptFailure(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed stored data
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One link in the credential chain
pub trait CredentialBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Save or replace an account
    fn store(&self, account: &Account) -> Result<(), CredentialError>;

    /// Load one account
    fn retrieve(&self, username: &str) -> Result<Account, CredentialError>;

    /// All accounts this backend can enumerate
    fn list(&self) -> Result<Vec<Account>, CredentialError>;

    /// Remove one account
    fn delete(&self, username: &str) -> Result<(), CredentialError>;

    /// Whether the account is present
    fn exists(&self, username: &str) -> bool {
        self.retrieve(username).is_ok()
    }
}

/// Ordered chain of credential backends
pub struct CredentialManager {
    backends: Vec<Box<dyn CredentialBackend>>,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("CredentialManager")
            .field("backends", &names)
            .finish()
    }
}

impl CredentialManager {
    /// Build a manager over explicit backends, consulted in order
    pub fn new(backends: Vec<Box<dyn CredentialBackend>>) -> Self {
        Self { backends }
    }

    /// Keyring (when usable), encrypted file in `config_dir`, then environment
    pub fn with_default_chain(config_dir: &Path) -> Result<Self, CredentialError> {
        let mut backends: Vec<Box<dyn CredentialBackend>> = Vec::new();

        match KeyringStore::probe() {
            Ok(store) => backends.push(Box::new(store)),
            Err(e) => debug!(error = %e, "System keyring unavailable, skipping"),
        }

        backends.push(Box::new(EncryptedFileStore::open_default(config_dir)?));
        backends.push(Box::new(EnvironmentStore::new()));

        Ok(Self::new(backends))
    }

    /// Names of the configured backends, in order
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Store in the first backend that accepts; returns its name.
    pub fn store(&self, account: &Account) -> Result<&'static str, CredentialError> {
        account
            .validate()
            .map_err(CredentialError::InvalidCredentials)?;

        let mut stamped = account.clone();
        stamped.last_modified = Utc::now();

        let mut last_error = None;
        for backend in &self.backends {
            match backend.store(&stamped) {
                Ok(()) => {
                    info!(
                        username = %stamped.username,
                        backend = backend.name(),
                        "Credentials stored"
                    );
                    return Ok(backend.name());
                }
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Backend refused store");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CredentialError::StoreUnavailable("no credential backends configured".to_string())
        }))
    }

    /// First hit across backends.
    ///
    /// Returns `NotFound` only if every backend misses; a decrypt or I/O
    /// failure is reported when nothing else matched.
    pub fn retrieve(&self, username: &str) -> Result<Account, CredentialError> {
        if username.trim().is_empty() {
            return Err(CredentialError::InvalidCredentials(
                "username is required".to_string(),
            ));
        }

        let mut hard_error = None;
        for backend in &self.backends {
            match backend.retrieve(username) {
                Ok(account) => {
                    debug!(username, backend = backend.name(), "Credentials found");
                    return Ok(account);
                }
                Err(CredentialError::NotFound(_)) | Err(CredentialError::StoreUnavailable(_)) => {}
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Credential backend failed");
                    hard_error.get_or_insert(e);
                }
            }
        }

        Err(hard_error.unwrap_or_else(|| CredentialError::NotFound(username.to_string())))
    }

    /// Environment account if set, else the most recently modified stored one
    pub fn retrieve_default(&self) -> Result<Account, CredentialError> {
        for backend in &self.backends {
            if backend.name() == env_store::BACKEND_NAME {
                if let Ok(account) = backend.retrieve(env_store::DEFAULT_USERNAME) {
                    return Ok(account);
                }
            }
        }

        self.list()?
            .into_iter()
            .max_by_key(|a| a.last_modified)
            .ok_or_else(|| CredentialError::NotFound("default".to_string()))
    }

    /// Merge of all backends, newest copy per username, sorted by username
    pub fn list(&self) -> Result<Vec<Account>, CredentialError> {
        let mut merged: HashMap<String, Account> = HashMap::new();
        for backend in &self.backends {
            let accounts = match backend.list() {
                Ok(accounts) => accounts,
                Err(e) => {
                    debug!(backend = backend.name(), error = %e, "Skipping backend in list");
                    continue;
                }
            };
            for account in accounts {
                match merged.get(&account.username) {
                    Some(existing) if existing.last_modified >= account.last_modified => {}
                    _ => {
                        merged.insert(account.username.clone(), account);
                    }
                }
            }
        }

        let mut accounts: Vec<Account> = merged.into_values().collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    /// Delete from every backend; succeeds if any backend did
    pub fn delete(&self, username: &str) -> Result<(), CredentialError> {
        let mut deleted = false;
        let mut last_error = None;
        for backend in &self.backends {
            match backend.delete(username) {
                Ok(()) => {
                    debug!(username, backend = backend.name(), "Credentials deleted");
                    deleted = true;
                }
                Err(e) => last_error = Some(e),
            }
        }

        if deleted {
            info!(username, "Credentials removed");
            return Ok(());
        }
        match last_error {
            Some(CredentialError::StoreUnavailable(_)) | None => {
                Err(CredentialError::NotFound(username.to_string()))
            }
            Some(e) => Err(e),
        }
    }

    /// Delete every listed account, returning how many were removed
    pub fn delete_all(&self) -> Result<usize, CredentialError> {
        let mut removed = 0;
        for account in self.list()? {
            if self.delete(&account.username).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Whether any backend has the account
    pub fn exists(&self, username: &str) -> bool {
        self.backends.iter().any(|b| b.exists(username))
    }
}
