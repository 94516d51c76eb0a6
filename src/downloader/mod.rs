//! Download orchestration and rate limiting
//!
//! This module holds the download pipeline: the token-bucket limiter, the
//! typed retry policy, the worker pool and the coordinator that wires them to
//! the feed paginator.
//!
//! # Overview
//!
//! 1. **Coordination**: [`coordinator::Coordinator::run`] opens the checkpoint and starts every task
//! 2. **Pagination**: [`crate::fetcher::FeedPaginator`] fills a bounded queue in feed order
//! 3. **Downloading**: [`worker::WorkerPool`] drains the queue with `W` tasks
//! 4. **Rate Limiting**: every request takes a permit from [`rate_limit::RateLimiter`]
//! 5. **Retries**: failures are retried per class by [`retry::RetryPolicy`]
//! 6. **Progress**: events flow to a [`progress::ProgressSink`]
//!
//! # Quick Start
//!
//! ```no_run
//! use igscraper::auth::Account;
//! use igscraper::config::Config;
//! use igscraper::downloader::{Coordinator, DisplayMode, LineSink};
//! use igscraper::shutdown::CancelHandle;
//! use igscraper::Username;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = Arc::new(LineSink::new(DisplayMode::Progress));
//! let coordinator = Coordinator::new(
//!     Config::default(),
//!     Account::new("me", "<sessionid>", "<csrftoken>"),
//!     sink,
//!     CancelHandle::new(),
//! )?;
//!
//! // Continue where an interrupted run stopped
//! let summary = coordinator.run(&Username::parse("nasa")?, true, false).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Item failures are reported as events and counted in the
//! [`coordinator::RunSummary`]; they never stop the run. A rejected session,
//! a feed page that exhausts its retries, or an interrupt cancels everything,
//! and the checkpoint is flushed before [`coordinator::Coordinator::run`]
//! returns.

pub mod config;
pub mod coordinator;
pub mod job;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod worker;

pub use coordinator::{Coordinator, RunSummary};
pub use job::ItemState;
pub use progress::{DisplayMode, LineSink, NullSink, ProgressEvent, ProgressSink, RecordingSink};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use retry::{ClassPolicy, ErrorClass, RetryPolicy};
pub use worker::{WorkerOutcome, WorkerPool};
