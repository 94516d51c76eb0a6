//! Binary-level checks: argument handling, exit codes and credential errors

use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

/// Binary with a clean environment confined to `home`
fn igscraper(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("igscraper").unwrap();
    cmd.env_clear()
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("IGSCRAPER_PASSPHRASE", "integration-passphrase")
        .env("RUST_LOG", "off")
        .current_dir(home);
    cmd
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_version_verb() {
    let home = TempDir::new().unwrap();
    let output = igscraper(home.path()).arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "stdout: {stdout}");
}

#[test]
fn test_missing_username_exits_1() {
    let home = TempDir::new().unwrap();
    let output = igscraper(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let output = igscraper(home.path()).arg("scrape").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_out_of_range_concurrency_exits_1() {
    let home = TempDir::new().unwrap();
    let output = igscraper(home.path())
        .args(["nasa", "--concurrent", "50"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("exceeds maximum"), "stderr: {}", stderr(&output));
}

#[test]
fn test_invalid_username_exits_1() {
    let home = TempDir::new().unwrap();
    let output = igscraper(home.path())
        .args(["--no-color", "bad/name"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid character"), "stderr: {}", stderr(&output));
}

#[test]
fn test_missing_credentials_reported_as_auth_required() {
    let home = TempDir::new().unwrap();
    let output = igscraper(home.path())
        .args(["--no-color", "--output"])
        .arg(home.path().join("out"))
        .arg("nasa")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("[FAILED] auth-required"), "stderr: {err}");
    assert!(err.contains("Suggestion:"), "stderr: {err}");
    assert!(!home.path().join("out").join("nasa").exists());
}

#[test]
fn test_legacy_config_key_rejected() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("legacy.json");
    std::fs::write(&config, r#"{"download": {"retry_attempts": 5}}"#).unwrap();

    let output = igscraper(home.path())
        .args(["--no-color", "--config"])
        .arg(&config)
        .arg("nasa")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("retry.max_attempts"), "stderr: {}", stderr(&output));
}

#[test]
fn test_auth_list_with_empty_storage() {
    let home = TempDir::new().unwrap();
    let output = igscraper(home.path()).args(["auth", "list"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No stored accounts"), "stdout: {stdout}");
}
