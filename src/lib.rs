//! # igscraper
//!
//! Download every public photo from a profile, given session cookies taken
//! from a logged-in browser.
//!
//! ## Features
//!
//! - **Resumable**: a per-profile checkpoint records finished short-codes and the feed cursor
//! - **Rate Limited**: one token-bucket permit per outbound request, shared by every task
//! - **Typed Retries**: network, rate-limit and server failures each have their own budget
//! - **Atomic Writes**: images are streamed to a temp file and renamed into place
//! - **Credential Chain**: system keyring, encrypted file, then environment variables
//!
//! ## Quick Start
//!
//! ```no_run
//! use igscraper::auth::Account;
//! use igscraper::config::Config;
//! use igscraper::downloader::{Coordinator, LineSink, DisplayMode};
//! use igscraper::shutdown::CancelHandle;
//! use igscraper::Username;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let account = Account::new("me", "<sessionid>", "<csrftoken>");
//! let sink = Arc::new(LineSink::new(DisplayMode::Normal));
//!
//! let coordinator = Coordinator::new(config, account, sink, CancelHandle::new())?;
//! let summary = coordinator
//!     .run(&Username::parse("nasa")?, false, false)
//!     .await?;
//! println!("downloaded {} photos", summary.downloaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`auth`] - Credential storage backends and the manager that chains them
//! - [`fetcher`] - Cookie-authenticated HTTP client and the feed paginator
//! - [`downloader`] - Rate limiter, retry policy, worker pool and coordinator
//! - [`resume`] - Checkpoint persistence
//! - [`output`] - On-disk layout and the metadata sidecar
//! - [`config`] - Settings from defaults, config file and environment
//!
//! Data flows `paginator -> bounded queue -> workers -> progress sink`, all
//! under one [`shutdown::CancelHandle`].

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential storage
pub mod auth;

/// CLI command implementations
pub mod cli;

/// Settings and config directory handling
pub mod config;

/// Download orchestration
pub mod downloader;

/// Crate-wide error taxonomy
pub mod error;

/// HTTP client and feed pagination
pub mod fetcher;

/// Username parsing and validation
pub mod identifier;

/// On-disk layout
pub mod output;

/// Resume capability
pub mod resume;

/// Cancellation shared across the pipeline
pub mod shutdown;

// Re-export commonly used types
pub use downloader::job::ItemState;
pub use error::{ErrorKind, ScrapeError, ScrapeResult};
pub use identifier::Username;

/// A single post from the profile feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable unique identifier assigned by the platform
    pub shortcode: String,
    /// Full-size image URL
    pub display_url: String,
    /// First caption, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Like count at fetch time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    /// When the post was published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    /// Videos are listed by the feed but never downloaded
    #[serde(default)]
    pub is_video: bool,
}

impl MediaItem {
    /// Create an image item with no optional metadata
    pub fn image(shortcode: impl Into<String>, display_url: impl Into<String>) -> Self {
        Self {
            shortcode: shortcode.into(),
            display_url: display_url.into(),
            caption: None,
            like_count: None,
            taken_at: None,
            is_video: false,
        }
    }

    /// Check the short-code is safe to use as a file stem and the URL is set
    pub fn validate(&self) -> Result<(), String> {
        if self.shortcode.is_empty() {
            return Err("short-code is empty".to_string());
        }
        if !self
            .shortcode
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("short-code '{}' has unexpected characters", self.shortcode));
        }
        if self.display_url.is_empty() && !self.is_video {
            return Err(format!("item {} has no display URL", self.shortcode));
        }
        Ok(())
    }
}

/// Position in the profile feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Opaque cursor for the next request; `None` before the first page
    pub end_cursor: Option<String>,
    /// Whether the feed has more pages after this one
    pub has_next_page: bool,
}

impl PageCursor {
    /// Cursor that requests the first page
    pub fn initial() -> Self {
        Self {
            end_cursor: None,
            has_next_page: true,
        }
    }

    /// Resume from a stored cursor string (empty means first page)
    pub fn resume_from(cursor: &str) -> Self {
        Self {
            end_cursor: (!cursor.is_empty()).then(|| cursor.to_string()),
            has_next_page: true,
        }
    }

    /// Whether this cursor requests the first page
    pub fn is_initial(&self) -> bool {
        self.end_cursor.as_deref().map_or(true, str::is_empty)
    }

    /// Cursor string for the request query, empty for the first page
    pub fn as_query(&self) -> &str {
        self.end_cursor.as_deref().unwrap_or("")
    }
}
