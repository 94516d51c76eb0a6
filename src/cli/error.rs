//! CLI error types and conversions

use crate::auth::CredentialError;
use crate::config::ConfigError;
use crate::error::{ErrorKind, ScrapeError};
use crate::fetcher::retry_formatter::format_failure;
use crate::identifier::IdentifierError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Pipeline error
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// Credential store error
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid username
    #[error("invalid username: {0}")]
    Identifier(#[from] IdentifierError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Terminal I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Whether the command stopped because of an interrupt
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Scrape(ScrapeError::Cancelled))
    }

    /// Taxonomy entry, when the error came from the pipeline
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Scrape(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Text for the failure summary printed before exiting
    pub fn summary(&self) -> String {
        match self {
            Self::Scrape(e) => format_failure(e),
            other => format!("[FAILED] {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_includes_kind() {
        let err = CliError::from(ScrapeError::AuthInvalid { status: 401 });
        assert_eq!(err.kind(), Some(ErrorKind::AuthInvalid));
        assert!(err.summary().starts_with("[FAILED] auth-invalid"));
        assert!(!err.is_cancelled());
        assert!(CliError::from(ScrapeError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_non_pipeline_summary() {
        let err = CliError::InvalidArgument("--concurrent must be positive".into());
        assert_eq!(err.kind(), None);
        assert_eq!(
            err.summary(),
            "[FAILED] invalid argument: --concurrent must be positive"
        );
    }
}
