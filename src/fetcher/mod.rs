//! Profile feed access
//!
//! - [`http`] - cookie-authenticated client for feed pages and image downloads
//! - [`models`] - wire types for the feed response
//! - [`pagination`] - the feed walker feeding the worker queue
//! - [`retry_formatter`] - user-facing retry and failure messages

pub mod http;
pub mod models;
pub mod pagination;
pub mod retry_formatter;

pub use http::InstagramClient;
pub use models::FeedPage;
pub use pagination::{FeedPaginator, PageReport, PaginationStats, QueuedItem};
