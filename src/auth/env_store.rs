//! Read-only backend over environment variables
//!
//! Reads `SESSION_ID`, `CSRF_TOKEN` and `USER_AGENT`, each looked up as
//! `IGSCRAPER_<NAME>` first and then `<NAME>`.

use chrono::Utc;

use super::{Account, CredentialBackend, CredentialError};
use crate::config;

/// Backend name, also used by [`super::CredentialManager::retrieve_default`]
pub const BACKEND_NAME: &str = "environment";

/// Username reported when the environment does not name one
pub const DEFAULT_USERNAME: &str = "default";

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment-variable credential source
pub struct EnvironmentStore {
    lookup: Lookup,
}

impl std::fmt::Debug for EnvironmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentStore").finish_non_exhaustive()
    }
}

impl Default for EnvironmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentStore {
    /// Read from the process environment
    pub fn new() -> Self {
        Self::with_lookup(config::env_var)
    }

    /// Read through a custom lookup (used by tests)
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn read(&self, username: &str) -> Option<Account> {
        let session_id = (self.lookup)("SESSION_ID")?;
        let csrf_token = (self.lookup)("CSRF_TOKEN")?;
        let username = if username.is_empty() {
            DEFAULT_USERNAME
        } else {
            username
        };
        Some(Account {
            username: username.to_string(),
            session_id,
            csrf_token,
            user_agent: (self.lookup)("USER_AGENT"),
            last_modified: Utc::now(),
        })
    }
}

impl CredentialBackend for EnvironmentStore {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn store(&self, _account: &Account) -> Result<(), CredentialError> {
        Err(CredentialError::StoreUnavailable(
            "environment credentials are read-only".to_string(),
        ))
    }

    /// The environment holds one session, reported under whatever name is asked for.
    fn retrieve(&self, username: &str) -> Result<Account, CredentialError> {
        self.read(username)
            .ok_or_else(|| CredentialError::NotFound(username.to_string()))
    }

    fn list(&self) -> Result<Vec<Account>, CredentialError> {
        Ok(self.read(DEFAULT_USERNAME).into_iter().collect())
    }

    fn delete(&self, _username: &str) -> Result<(), CredentialError> {
        Err(CredentialError::StoreUnavailable(
            "environment credentials are read-only".to_string(),
        ))
    }
}
