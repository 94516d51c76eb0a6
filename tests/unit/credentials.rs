//! Encrypted credential file behaviour

use igscraper::auth::{Account, CredentialBackend, CredentialError, CredentialManager, EncryptedFileStore};
use tempfile::TempDir;

const SESSION: &str = "SESSIONSECRET0123456789";
const CSRF: &str = "CSRFSECRET9876543210";

#[test]
fn test_tokens_never_written_in_clear() {
    let dir = TempDir::new().unwrap();
    let store = EncryptedFileStore::new(dir.path().join("credentials.enc"), "correct horse");
    store.store(&Account::new("someone", SESSION, CSRF)).unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(!raw.contains(SESSION));
    assert!(!raw.contains(CSRF));
    assert!(!raw.contains("someone"));

    let account = store.retrieve("someone").unwrap();
    assert_eq!(account.session_id, SESSION);
    assert_eq!(account.csrf_token, CSRF);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn test_wrong_passphrase_fails_to_decrypt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("credentials.enc");
    EncryptedFileStore::new(&path, "right")
        .store(&Account::new("someone", SESSION, CSRF))
        .unwrap();

    let err = EncryptedFileStore::new(&path, "wrong").retrieve("someone").unwrap_err();
    assert!(matches!(err, CredentialError::DecryptFailure(_)), "got {err:?}");
}

#[test]
fn test_manager_over_encrypted_file() {
    let dir = TempDir::new().unwrap();
    let manager = CredentialManager::new(vec![Box::new(EncryptedFileStore::new(
        dir.path().join("credentials.enc"),
        "pass",
    ))]);

    assert_eq!(manager.store(&Account::new("first", SESSION, CSRF)).unwrap(), "encrypted-file");
    manager.store(&Account::new("second", SESSION, CSRF)).unwrap();

    let names: Vec<String> = manager.list().unwrap().into_iter().map(|a| a.username).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert_eq!(manager.retrieve_default().unwrap().username, "second");

    manager.delete("first").unwrap();
    assert!(matches!(
        manager.retrieve("first"),
        Err(CredentialError::NotFound(_))
    ));
    assert_eq!(manager.delete_all().unwrap(), 1);
    assert!(!dir.path().join("credentials.enc").exists());
}
