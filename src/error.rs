//! Crate-wide error taxonomy
//!
//! Every failure that can leave the pipeline is folded into [`ScrapeError`].
//! Module-level errors (credentials, rate limiter, checkpoint, config) convert
//! into it so callers only ever match on one enum. [`ScrapeError::kind`] gives
//! the stable kebab-case name used in logs and the CLI summary line, and
//! [`ScrapeError::class`] tells the retry policy what to do with it.

use std::fmt;
use std::time::Duration;

use crate::auth::CredentialError;
use crate::config::ConfigError;
use crate::downloader::rate_limit::RateLimitError;
use crate::downloader::retry::ErrorClass;
use crate::resume::CheckpointError;

/// Result alias used across the crate
pub type ScrapeResult<T> = Result<T, ScrapeError>;

/// Errors surfaced by the download pipeline
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScrapeError {
    /// No usable credentials were found
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Upstream rejected the session (401/403)
    #[error("authentication rejected by server (HTTP {status})")]
    AuthInvalid {
        /// HTTP status returned by the server
        status: u16,
    },

    /// Profile or media does not exist (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 429 or a rate-limit body from the platform
    #[error("rate limited{}", format_retry_after(.retry_after))]
    RateLimited {
        /// Server-provided delay before the next attempt
        retry_after: Option<Duration>,
    },

    /// Transport failure (DNS, connect, reset, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 5xx
    #[error("server error (HTTP {status})")]
    Server {
        /// HTTP status returned by the server
        status: u16,
    },

    /// Any other non-retryable 4xx
    #[error("request rejected (HTTP {status})")]
    Client {
        /// HTTP status returned by the server
        status: u16,
    },

    /// Malformed response body
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Existing checkpoint cannot be resumed
    #[error("checkpoint incompatible: {0}")]
    CheckpointIncompatible(String),

    /// Anything that does not fit the categories above
    #[error("{0}")]
    Fatal(String),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

/// Stable names for the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `auth-required`
    AuthRequired,
    /// `auth-invalid`
    AuthInvalid,
    /// `not-found`
    NotFound,
    /// `rate-limited`
    RateLimited,
    /// `network-error`
    Network,
    /// `server-error`
    Server,
    /// `parse-error`
    Parse,
    /// `io-error`
    Io,
    /// `cancelled`
    Cancelled,
    /// `checkpoint-incompatible`
    CheckpointIncompatible,
    /// `fatal`
    Fatal,
}

impl ErrorKind {
    /// Kebab-case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth-required",
            Self::AuthInvalid => "auth-invalid",
            Self::NotFound => "not-found",
            Self::RateLimited => "rate-limited",
            Self::Network => "network-error",
            Self::Server => "server-error",
            Self::Parse => "parse-error",
            Self::Io => "io-error",
            Self::Cancelled => "cancelled",
            Self::CheckpointIncompatible => "checkpoint-incompatible",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScrapeError {
    /// Taxonomy entry for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired(_) => ErrorKind::AuthRequired,
            Self::AuthInvalid { .. } => ErrorKind::AuthInvalid,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::Client { .. } => ErrorKind::Fatal,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Io(_) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::CheckpointIncompatible(_) => ErrorKind::CheckpointIncompatible,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Retry class used by [`crate::downloader::retry::RetryPolicy`]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Network,
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::Server { .. } => ErrorClass::Server,
            Self::NotFound(_) | Self::Client { .. } | Self::Parse(_) => ErrorClass::Client,
            Self::AuthRequired(_)
            | Self::AuthInvalid { .. }
            | Self::Io(_)
            | Self::Cancelled
            | Self::CheckpointIncompatible(_)
            | Self::Fatal(_) => ErrorClass::Fatal,
        }
    }

    /// Delay requested by the server, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error is the cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error must stop the whole pipeline rather than one item
    pub fn aborts_pipeline(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalid { .. } | Self::AuthRequired(_) | Self::Cancelled
        )
    }

    /// Map an HTTP status onto the taxonomy
    ///
    /// `retry_after` is only consulted for 429.
    pub fn from_status(status: u16, retry_after: Option<Duration>, context: &str) -> Self {
        match status {
            401 | 403 => Self::AuthInvalid { status },
            404 => Self::NotFound(context.to_string()),
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server { status },
            _ => Self::Client { status },
        }
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), None, &e.to_string());
        }
        if e.is_decode() {
            return Self::Parse(e.to_string());
        }
        Self::Network(e.to_string())
    }
}

impl From<CredentialError> for ScrapeError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::NotFound(user) => {
                Self::AuthRequired(format!("no stored credentials for '{user}'"))
            }
            CredentialError::InvalidCredentials(msg) => Self::AuthRequired(msg),
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl From<RateLimitError> for ScrapeError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Cancelled => Self::Cancelled,
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl From<CheckpointError> for ScrapeError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::Incompatible { .. } | CheckpointError::NotEmpty { .. } => {
                Self::CheckpointIncompatible(e.to_string())
            }
            CheckpointError::Io(msg) | CheckpointError::Lock(msg) => Self::Io(msg),
            CheckpointError::Serialization(msg) => Self::Parse(msg),
        }
    }
}

impl From<ConfigError> for ScrapeError {
    fn from(e: ConfigError) -> Self {
        Self::Fatal(e.to_string())
    }
}
