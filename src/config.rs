//! Runtime configuration
//!
//! Values are layered: built-in defaults, then the JSON config file, then
//! environment variables, then command-line flags (applied by the CLI).
//! Environment variables are looked up as `IGSCRAPER_<NAME>` first and as the
//! bare `<NAME>` second.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Application name used for the config directory and keyring service
pub const APP_NAME: &str = "igscraper";

/// Prefix for environment variables
pub const ENV_PREFIX: &str = "IGSCRAPER_";

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default requests per minute
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Default token-bucket capacity
pub const DEFAULT_BURST_SIZE: u32 = 10;

/// Default number of download workers
pub const DEFAULT_CONCURRENT: usize = 3;

/// Upper bound on download workers
pub const MAX_CONCURRENT: usize = 10;

/// Default per-attempt download timeout in seconds
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Default output directory
pub const DEFAULT_OUTPUT_DIR: &str = "./downloads";

/// Keys from older config files that are no longer accepted, with their replacement
const DEPRECATED_KEYS: &[(&str, &str, &str)] = &[
    ("retry", "network_retries", "retry.network.max_attempts"),
    ("download", "retry_attempts", "retry.max_attempts"),
    ("rate_limit", "max_retries", "retry.max_attempts"),
];

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read a file
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed config file
    #[error("invalid config file: {0}")]
    Parse(String),

    /// A removed key is present
    #[error("config key '{key}' is deprecated and no longer accepted; use '{replacement}' instead")]
    Deprecated {
        /// Offending key path
        key: String,
        /// Key to use instead
        replacement: String,
    },

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No home or config directory could be determined
    #[error("could not determine configuration directory")]
    NoConfigDir,
}

/// Log verbosity accepted by `--log-level` and the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything including request traces
    Debug,
    /// Normal operation
    #[default]
    Info,
    /// Warnings and errors
    Warn,
    /// Errors only
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "Invalid log level: {s}. Valid options: debug, info, warn, error"
            )),
        }
    }
}

/// Token-bucket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Refill rate in requests per minute
    pub requests_per_minute: u32,
    /// Bucket capacity
    pub burst_size: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_size: DEFAULT_BURST_SIZE,
        }
    }
}

/// Worker-pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Number of workers
    pub concurrent_downloads: usize,
    /// Per-attempt timeout for a single image download
    pub download_timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrent_downloads: DEFAULT_CONCURRENT,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl DownloadSettings {
    /// Timeout as a [`Duration`]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Root under which `<username>/` directories are created
    pub base_directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

/// Per-class retry override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryClassSettings {
    /// Attempts allowed for this class (falls back to `retry.max_attempts`)
    pub max_attempts: Option<u32>,
    /// First backoff delay for this class (falls back to `retry.base_delay_secs`)
    pub base_delay_secs: Option<f64>,
}

impl RetryClassSettings {
    fn preset(max_attempts: u32, base_delay_secs: f64) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay_secs: Some(base_delay_secs),
        }
    }
}

/// Typed retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Global attempt budget
    pub max_attempts: u32,
    /// Global first backoff delay
    pub base_delay_secs: f64,
    /// Cap applied before jitter
    pub max_delay_secs: f64,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Relative jitter, 0.1 means +/-10%
    pub jitter: f64,
    /// Connection resets, DNS, timeouts
    pub network: RetryClassSettings,
    /// HTTP 429 and rate-limit bodies
    pub rate_limit: RetryClassSettings,
    /// HTTP 5xx
    pub server: RetryClassSettings,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            multiplier: 2.0,
            jitter: 0.1,
            network: RetryClassSettings::preset(5, 1.0),
            rate_limit: RetryClassSettings::preset(3, 30.0),
            server: RetryClassSettings::preset(3, 5.0),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when neither `RUST_LOG` nor a flag overrides it
    pub level: LogLevel,
}

/// Notification settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Whether desktop notifications were requested
    pub enabled: bool,
}

/// Full configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rate limiter
    pub rate_limit: RateLimitSettings,
    /// Worker pool
    pub download: DownloadSettings,
    /// Output location
    pub output: OutputSettings,
    /// Retry policy
    pub retry: RetrySettings,
    /// Logging
    pub logging: LoggingSettings,
    /// Notifications
    pub notifications: NotificationSettings,
}

impl Config {
    /// Load configuration from `path`, or from the default location if `None`.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    /// Environment overrides are applied after the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match config_dir() {
                Ok(dir) if dir.join(CONFIG_FILE_NAME).is_file() => {
                    Self::from_file(&dir.join(CONFIG_FILE_NAME))?
                }
                _ => Self::default(),
            },
        };
        config.apply_env(env_var);
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading config file");
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let config = Self::from_json_str(&contents)?;
        info!(path = %path.display(), "Config file loaded");
        Ok(config)
    }

    /// Parse a JSON document, rejecting deprecated keys.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        reject_deprecated_keys(&value)?;
        serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment overrides using `lookup` to resolve variable names.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("OUTPUT_DIR") {
            self.output.base_directory = PathBuf::from(dir);
        }
        if let Some(rpm) = lookup("REQUESTS_PER_MINUTE").and_then(|v| v.parse().ok()) {
            if rpm > 0 {
                self.rate_limit.requests_per_minute = rpm;
            }
        }
        if let Some(n) = lookup("CONCURRENT_DOWNLOADS").and_then(|v| v.parse().ok()) {
            if n > 0 {
                self.download.concurrent_downloads = n;
            }
        }
        if let Some(level) = lookup("LOG_LEVEL").and_then(|v| v.parse().ok()) {
            self.logging.level = level;
        }
        if let Some(enabled) = lookup("NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = enabled.eq_ignore_ascii_case("true");
        }
    }

    /// Check every value is within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.requests_per_minute must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.burst_size == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.burst_size must be at least 1".to_string(),
            ));
        }
        let workers = self.download.concurrent_downloads;
        if workers == 0 || workers > MAX_CONCURRENT {
            return Err(ConfigError::Invalid(format!(
                "download.concurrent_downloads must be between 1 and {MAX_CONCURRENT}, got {workers}"
            )));
        }
        if self.download.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "download.download_timeout_secs must be at least 1".to_string(),
            ));
        }
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&retry.jitter) {
            return Err(ConfigError::Invalid(
                "retry.jitter must be in [0.0, 1.0)".to_string(),
            ));
        }
        if retry.base_delay_secs < 0.0 || retry.max_delay_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "retry delays must not be negative".to_string(),
            ));
        }
        for (name, class) in [
            ("network", &retry.network),
            ("rate_limit", &retry.rate_limit),
            ("server", &retry.server),
        ] {
            if class.max_attempts == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "retry.{name}.max_attempts must be at least 1"
                )));
            }
            if class.base_delay_secs.is_some_and(|d| d < 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "retry.{name}.base_delay_secs must not be negative"
                )));
            }
        }
        Ok(())
    }
}

fn reject_deprecated_keys(value: &serde_json::Value) -> Result<(), ConfigError> {
    for (section, key, replacement) in DEPRECATED_KEYS {
        if value.get(section).and_then(|s| s.get(key)).is_some() {
            return Err(ConfigError::Deprecated {
                key: format!("{section}.{key}"),
                replacement: (*replacement).to_string(),
            });
        }
    }
    Ok(())
}

/// Look up `IGSCRAPER_<name>`, falling back to `<name>`. Empty values count as unset.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Whether a boolean-ish environment variable is set to a truthy value.
pub fn env_flag(name: &str) -> bool {
    env_var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Load `.env` files from the working directory and the config directory.
///
/// Existing environment variables are never overwritten.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "Loaded .env file");
    }
    if let Ok(dir) = config_dir() {
        let path = dir.join(".env");
        if path.is_file() && dotenvy::from_path(&path).is_ok() {
            debug!(path = %path.display(), "Loaded .env file");
        }
    }
}

/// Resolve the per-platform config directory without creating it.
pub fn config_dir_path() -> Result<PathBuf, ConfigError> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|home| home.join("Library").join("Application Support"))
            .ok_or(ConfigError::NoConfigDir)?
    } else if cfg!(windows) {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .ok_or(ConfigError::NoConfigDir)?
    } else {
        match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            Some(xdg) => PathBuf::from(xdg),
            None => dirs::home_dir()
                .map(|home| home.join(".config"))
                .ok_or(ConfigError::NoConfigDir)?,
        }
    };
    Ok(base.join(APP_NAME))
}

/// Resolve the config directory, creating it with owner-only permissions.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir_path()?;
    ensure_private_dir(&dir).map_err(|e| ConfigError::Io(e.to_string()))?;
    Ok(dir)
}

/// Create `dir` (and parents) and restrict it to the owner.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Restrict an existing file to owner read/write.
pub fn restrict_file(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
