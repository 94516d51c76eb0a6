//! Retry and failure message formatting.
//!
//! Keeps retry log lines and the final CLI failure hint consistent across the
//! paginator, the workers and the command handlers.

use std::time::Duration;

use crate::downloader::retry::ErrorClass;
use crate::error::{ErrorKind, ScrapeError};

/// Short human description of an error class.
pub fn describe_class(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Network => "network error",
        ErrorClass::RateLimit => "rate limit exceeded",
        ErrorClass::Server => "server error",
        ErrorClass::Client => "request rejected",
        ErrorClass::Fatal => "unrecoverable error",
    }
}

/// Actionable advice for an error kind, shown after a failed run.
pub fn suggestion(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::AuthRequired => {
            "Store credentials with `igscraper auth login` or set IGSCRAPER_SESSION_ID and IGSCRAPER_CSRF_TOKEN"
        }
        ErrorKind::AuthInvalid => {
            "Your session cookies were rejected; log in again in the browser and re-run `igscraper auth login`"
        }
        ErrorKind::NotFound => "Check the username for typos; the profile may be private or deleted",
        ErrorKind::RateLimited => "Lower --rate-limit or wait a few minutes before retrying",
        ErrorKind::Network => "Check your network connection and DNS resolution",
        ErrorKind::Server => "The platform is having trouble; try again later",
        ErrorKind::Parse => "The response format may have changed; re-run with --log-level debug",
        ErrorKind::Io => "Check free disk space and permissions on the output directory",
        ErrorKind::Cancelled => "Re-run with --resume to continue where you left off",
        ErrorKind::CheckpointIncompatible => {
            "Re-run with --force-restart to discard the existing checkpoint"
        }
        ErrorKind::Fatal => "Re-run with --log-level debug for details",
    }
}

/// Context for one retry decision.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Upcoming attempt number for this class (1-based)
    pub attempt: u32,
    /// Attempts allowed for this class
    pub max_attempts: u32,
    /// Class of the error that triggered the retry
    pub class: ErrorClass,
    /// Delay before the next attempt
    pub backoff: Duration,
    /// What is being fetched (page, short-code)
    pub label: String,
    /// Display form of the error
    pub error_message: String,
}

impl RetryContext {
    /// Build a retry context.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        class: ErrorClass,
        backoff: Duration,
        label: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            class,
            backoff,
            label: label.into(),
            error_message: error_message.into(),
        }
    }

    /// "Retrying (attempt 2/5) after network error - waiting 1.0 seconds... (page 3)"
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            describe_class(self.class),
            self.backoff.as_secs_f64()
        );
        if !self.label.is_empty() {
            message.push_str(&format!(" ({})", self.label));
        }
        message
    }
}

/// Multi-line failure summary for an error that ended a run.
pub fn format_failure(err: &ScrapeError) -> String {
    let kind = err.kind();
    [
        format!("[FAILED] {kind}: {err}"),
        format!("  Suggestion: {}", suggestion(kind)),
    ]
    .join("\n")
}
