//! Config file parsing and validation

use igscraper::config::{Config, ConfigError, LogLevel};
use pretty_assertions::assert_eq;

#[test]
fn test_partial_file_keeps_defaults() {
    let config = Config::from_json_str(
        r#"{"rate_limit": {"requests_per_minute": 30}, "logging": {"level": "warn"}}"#,
    )
    .unwrap();
    let defaults = Config::default();

    assert_eq!(config.rate_limit.requests_per_minute, 30);
    assert_eq!(config.rate_limit.burst_size, defaults.rate_limit.burst_size);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(
        config.download.concurrent_downloads,
        defaults.download.concurrent_downloads
    );
    config.validate().unwrap();
}

#[test]
fn test_every_legacy_retry_key_rejected() {
    for (doc, replacement) in [
        (r#"{"retry": {"network_retries": 3}}"#, "retry.network.max_attempts"),
        (r#"{"download": {"retry_attempts": 3}}"#, "retry.max_attempts"),
        (r#"{"rate_limit": {"max_retries": 3}}"#, "retry.max_attempts"),
    ] {
        match Config::from_json_str(doc) {
            Err(ConfigError::Deprecated { replacement: r, .. }) => assert_eq!(r, replacement),
            other => panic!("{doc}: expected deprecation error, got {other:?}"),
        }
    }
}

#[test]
fn test_out_of_range_values_rejected() {
    let mut config = Config::default();
    config.download.concurrent_downloads = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = Config::default();
    config.rate_limit.requests_per_minute = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_malformed_json_is_parse_error() {
    assert!(matches!(
        Config::from_json_str("{not json"),
        Err(ConfigError::Parse(_))
    ));
}
