//! Encrypted credential file
//!
//! All accounts live in one JSON envelope, `credentials.enc` in the config
//! directory:
//!
//! ```json
//! {"salt": "<base64>", "encrypted": "<base64 nonce||ciphertext>", "version": 1, "modified": "..."}
//! ```
//!
//! The key is PBKDF2-HMAC-SHA256 (100 000 rounds) over the passphrase and the
//! 32-byte salt. The plaintext is a JSON map of username to [`Account`],
//! sealed with AES-256-GCM under a fresh 12-byte nonce on every write.
//!
//! The passphrase comes from `IGSCRAPER_PASSPHRASE`, then from
//! `<config_dir>/.passphrase`. If neither exists a random one is generated
//! and written to `.passphrase` with owner-only permissions.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{Account, CredentialBackend, CredentialError};
use crate::config;

/// File name inside the config directory
pub const CREDENTIALS_FILE: &str = "credentials.enc";

/// Passphrase file name inside the config directory
pub const PASSPHRASE_FILE: &str = ".passphrase";

/// Envelope format version
pub const FORMAT_VERSION: u32 = 1;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 32;
const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const GENERATED_PASSPHRASE_BYTES: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    salt: String,
    encrypted: String,
    version: u32,
    modified: DateTime<Utc>,
}

type AccountMap = BTreeMap<String, Account>;

/// AES-256-GCM encrypted file backend
pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
    iterations: u32,
    // Serializes read-modify-write cycles within the process
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    /// Open a store at an explicit path with an explicit passphrase
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            iterations: PBKDF2_ITERATIONS,
            write_lock: Mutex::new(()),
        }
    }

    /// Open `credentials.enc` in `config_dir`, resolving the passphrase
    pub fn open_default(config_dir: &Path) -> Result<Self, CredentialError> {
        let passphrase = resolve_passphrase(config_dir)?;
        Ok(Self::new(config_dir.join(CREDENTIALS_FILE), passphrase))
    }

    #[cfg(test)]
    fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Location of the encrypted file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.passphrase.as_bytes(), salt, self.iterations, &mut key);
        key
    }

    /// Read and decrypt, returning the salt so rewrites can keep it.
    fn load(&self) -> Result<(AccountMap, Option<Vec<u8>>), CredentialError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((AccountMap::new(), None))
            }
            Err(e) => return Err(CredentialError::Io(e.to_string())),
        };

        let envelope: Envelope = serde_json::from_str(&raw)
            .map_err(|e| CredentialError::Serialization(format!("credential envelope: {e}")))?;
        if envelope.version != FORMAT_VERSION {
            return Err(CredentialError::Serialization(format!(
                "unsupported credential file version {}",
                envelope.version
            )));
        }

        let salt = general_purpose::STANDARD
            .decode(&envelope.salt)
            .map_err(|e| CredentialError::DecryptFailure(format!("salt: {e}")))?;
        let sealed = general_purpose::STANDARD
            .decode(&envelope.encrypted)
            .map_err(|e| CredentialError::DecryptFailure(format!("payload: {e}")))?;
        if sealed.len() < NONCE_LENGTH {
            return Err(CredentialError::DecryptFailure(
                "ciphertext is too short".to_string(),
            ));
        }

        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                CredentialError::DecryptFailure(
                    "authentication tag mismatch (wrong passphrase or tampered file)".to_string(),
                )
            })?;

        let accounts: AccountMap = serde_json::from_slice(&plaintext)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        Ok((accounts, Some(salt)))
    }

    /// Encrypt and atomically replace the file. An empty map removes it.
    fn save(&self, accounts: &AccountMap, salt: Option<Vec<u8>>) -> Result<(), CredentialError> {
        if accounts.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => {
                    debug!(path = %self.path.display(), "Removed empty credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CredentialError::Io(e.to_string())),
            };
        }

        let salt = salt.unwrap_or_else(|| {
            let mut salt = vec![0u8; SALT_LENGTH];
            OsRng.fill_bytes(&mut salt);
            salt
        });
        let key = self.derive_key(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let plaintext = serde_json::to_vec(accounts)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| CredentialError::Serialization(format!("encryption failed: {e:?}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);

        let envelope = Envelope {
            salt: general_purpose::STANDARD.encode(&salt),
            encrypted: general_purpose::STANDARD.encode(&sealed),
            version: FORMAT_VERSION,
            modified: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config::ensure_private_dir(dir).map_err(io_error)?;

        let temp = private_temp(dir, &json)?;
        temp.persist(&self.path)
            .map_err(|e| CredentialError::Io(e.error.to_string()))?;
        Ok(())
    }

    fn modify<F>(&self, change: F) -> Result<(), CredentialError>
    where
        F: FnOnce(&mut AccountMap) -> Result<(), CredentialError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CredentialError::Io("credential file lock poisoned".to_string()))?;
        let (mut accounts, salt) = self.load()?;
        change(&mut accounts)?;
        self.save(&accounts, salt)
    }
}

fn io_error(err: std::io::Error) -> CredentialError {
    CredentialError::Io(err.to_string())
}

/// Owner-only temp file in `dir` holding `contents`, ready to persist.
fn private_temp(dir: &Path, contents: &[u8]) -> Result<NamedTempFile, CredentialError> {
    let mut temp = NamedTempFile::new_in(dir).map_err(io_error)?;
    config::restrict_file(temp.path()).map_err(io_error)?;
    temp.write_all(contents).map_err(io_error)?;
    temp.as_file().sync_all().map_err(io_error)?;
    Ok(temp)
}

/// Passphrase from the environment, the passphrase file, or a new random one.
pub fn resolve_passphrase(config_dir: &Path) -> Result<String, CredentialError> {
    if let Some(passphrase) = config::env_var("PASSPHRASE") {
        return Ok(passphrase);
    }

    let path = config_dir.join(PASSPHRASE_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(e)),
    }

    let mut bytes = [0u8; GENERATED_PASSPHRASE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let passphrase = general_purpose::URL_SAFE.encode(bytes);

    config::ensure_private_dir(config_dir).map_err(io_error)?;
    let temp = private_temp(config_dir, passphrase.as_bytes())?;
    match temp.persist_noclobber(&path) {
        Ok(_) => {
            info!(path = %path.display(), "Generated credential passphrase");
            Ok(passphrase)
        }
        // another process generated one first
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            let contents = std::fs::read_to_string(&path).map_err(io_error)?;
            Ok(contents.trim().to_string())
        }
        Err(e) => Err(io_error(e.error)),
    }
}

impl CredentialBackend for EncryptedFileStore {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn store(&self, account: &Account) -> Result<(), CredentialError> {
        let account = account.clone();
        self.modify(move |accounts| {
            accounts.insert(account.username.clone(), account);
            Ok(())
        })
    }

    fn retrieve(&self, username: &str) -> Result<Account, CredentialError> {
        let (accounts, _) = self.load()?;
        accounts
            .get(username)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(username.to_string()))
    }

    fn list(&self) -> Result<Vec<Account>, CredentialError> {
        let (accounts, _) = self.load()?;
        Ok(accounts.into_values().collect())
    }

    fn delete(&self, username: &str) -> Result<(), CredentialError> {
        self.modify(|accounts| {
            accounts
                .remove(username)
                .map(|_| ())
                .ok_or_else(|| CredentialError::NotFound(username.to_string()))
        })
    }
}
