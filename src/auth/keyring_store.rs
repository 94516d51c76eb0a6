//! Platform secret service backend (macOS Keychain, Windows Credential Manager, Secret Service)
//!
//! Keyrings cannot be enumerated portably, so the backend keeps its own index:
//! a JSON array of usernames under `igscraper` / `__igscraper_accounts__`. `store`
//! and `delete` keep it in step with the account entries and `list` reads
//! through it.

use keyring::Entry;
use std::collections::BTreeSet;

use super::{Account, CredentialBackend, CredentialError};
use crate::config::APP_NAME;

/// Keyring service name
pub const SERVICE: &str = APP_NAME;

const KEY_PREFIX: &str = "instagram_";
const INDEX_KEY: &str = "__igscraper_accounts__";
const PROBE_KEY: &str = "__igscraper_probe__";

/// Named secret slots under one service
pub trait SecretSlots: Send + Sync {
    /// Value of `key`, `None` when unset
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Create or replace `key`
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Remove `key`; `false` when it was not set
    fn remove(&self, key: &str) -> Result<bool, CredentialError>;
}

/// Slots backed by the OS keyring
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformKeyring;

impl PlatformKeyring {
    fn entry(key: &str) -> Result<Entry, CredentialError> {
        Entry::new(SERVICE, key).map_err(unavailable)
    }
}

fn unavailable(err: keyring::Error) -> CredentialError {
    CredentialError::StoreUnavailable(err.to_string())
}

impl SecretSlots for PlatformKeyring {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        Self::entry(key)?.set_password(value).map_err(unavailable)
    }

    fn remove(&self, key: &str) -> Result<bool, CredentialError> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(unavailable(e)),
        }
    }
}

/// Credentials stored as JSON under `igscraper` / `instagram_<username>`
#[derive(Debug, Default)]
pub struct KeyringStore<S = PlatformKeyring> {
    slots: S,
}

impl KeyringStore {
    /// Check the platform keyring accepts writes before using it.
    ///
    /// Headless Linux hosts often have no secret service; in that case the
    /// encrypted file backend takes over.
    pub fn probe() -> Result<Self, CredentialError> {
        let slots = PlatformKeyring;
        slots.set(PROBE_KEY, "probe")?;
        slots.get(PROBE_KEY)?;
        let _ = slots.remove(PROBE_KEY);
        Ok(Self { slots })
    }
}

impl<S: SecretSlots> KeyringStore<S> {
    /// Store over arbitrary slots
    pub fn with_slots(slots: S) -> Self {
        Self { slots }
    }

    fn key(username: &str) -> String {
        format!("{KEY_PREFIX}{username}")
    }

    fn index(&self) -> Result<BTreeSet<String>, CredentialError> {
        match self.slots.get(INDEX_KEY)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| CredentialError::Serialization(format!("keyring index: {e}"))),
            None => Ok(BTreeSet::new()),
        }
    }

    fn save_index(&self, index: &BTreeSet<String>) -> Result<(), CredentialError> {
        if index.is_empty() {
            self.slots.remove(INDEX_KEY)?;
            return Ok(());
        }
        let json = serde_json::to_string(index)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        self.slots.set(INDEX_KEY, &json)
    }
}

impl<S: SecretSlots> CredentialBackend for KeyringStore<S> {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn store(&self, account: &Account) -> Result<(), CredentialError> {
        let json = serde_json::to_string(account)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        self.slots.set(&Self::key(&account.username), &json)?;

        let mut index = self.index()?;
        if index.insert(account.username.clone()) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn retrieve(&self, username: &str) -> Result<Account, CredentialError> {
        let json = self
            .slots
            .get(&Self::key(username))?
            .ok_or_else(|| CredentialError::NotFound(username.to_string()))?;
        serde_json::from_str(&json).map_err(|e| CredentialError::Serialization(e.to_string()))
    }

    fn list(&self) -> Result<Vec<Account>, CredentialError> {
        let mut accounts = Vec::new();
        for username in self.index()? {
            match self.retrieve(&username) {
                Ok(account) => accounts.push(account),
                // removed outside this tool
                Err(CredentialError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(accounts)
    }

    fn delete(&self, username: &str) -> Result<(), CredentialError> {
        let removed = self.slots.remove(&Self::key(username))?;

        let mut index = self.index()?;
        if index.remove(username) {
            self.save_index(&index)?;
        }

        if removed {
            Ok(())
        } else {
            Err(CredentialError::NotFound(username.to_string()))
        }
    }
}
