//! Profile feed pagination
//!
//! Walks the cursor-based feed one page at a time and pushes image items onto
//! the bounded worker queue in feed order. A full queue blocks the paginator,
//! which is the only backpressure needed.
//!
//! Includes safety mechanisms:
//! - a repeated cursor ends pagination (the feed would loop forever otherwise)
//! - a maximum page count
//! - every wait is abandoned on cancellation

use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::http::InstagramClient;
use crate::downloader::config::MAX_PAGES;
use crate::error::{ScrapeError, ScrapeResult};
use crate::shutdown::CancelHandle;
use crate::{MediaItem, PageCursor, Username};

/// An item on its way to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedItem {
    /// The media item
    pub item: MediaItem,
    /// Index of the page it came from (0-based)
    pub page: u32,
}

/// Sent to the coordinator before a page's items are queued
#[derive(Debug, Clone, PartialEq)]
pub struct PageReport {
    /// Page index (0-based)
    pub index: u32,
    /// Cursor this page was requested with; empty for the first page
    pub request_cursor: String,
    /// Where the feed continues after this page
    pub next: PageCursor,
    /// Short-codes of the image items queued from this page
    pub shortcodes: Vec<String>,
    /// Videos on this page that were skipped
    pub videos_skipped: usize,
    /// Total posts reported by the profile
    pub total: Option<u64>,
}

/// Totals for one pagination run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationStats {
    /// Pages fetched
    pub pages: u32,
    /// Image items queued
    pub items: usize,
    /// Videos skipped
    pub videos_skipped: usize,
}

/// Single-task producer over the profile feed
#[derive(Debug)]
pub struct FeedPaginator {
    client: InstagramClient,
    username: Username,
    start: PageCursor,
    probe_known: Option<HashSet<String>>,
    cancel: CancelHandle,
    max_pages: u32,
}

impl FeedPaginator {
    /// Paginator starting at the first page
    pub fn new(client: InstagramClient, username: Username, cancel: CancelHandle) -> Self {
        Self {
            client,
            username,
            start: PageCursor::initial(),
            probe_known: None,
            cancel,
            max_pages: MAX_PAGES,
        }
    }

    /// Start from a stored cursor instead of the first page
    pub fn starting_at(mut self, cursor: PageCursor) -> Self {
        self.start = cursor;
        self
    }

    /// Probe mode for a profile that was already fully downloaded.
    ///
    /// Pagination starts at the first page and stops after the first page
    /// whose images are all in `known`; that page is reported as the end of
    /// the feed.
    pub fn probe(mut self, known: HashSet<String>) -> Self {
        self.start = PageCursor::initial();
        self.probe_known = Some(known);
        self
    }

    /// Override the page limit
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Walk the feed until it ends, queueing image items.
    ///
    /// Each page is reported on `pages` before its items are sent on `items`.
    /// Returns when the feed ends, the cursor repeats, the page limit is hit,
    /// or the item receiver is dropped. A page request that exhausts its
    /// retries is returned as an error.
    pub async fn run(
        self,
        items: mpsc::Sender<QueuedItem>,
        pages: mpsc::UnboundedSender<PageReport>,
    ) -> ScrapeResult<PaginationStats> {
        let mut stats = PaginationStats::default();
        let mut cursor = self.start.clone();
        let mut seen_cursors: HashSet<String> = HashSet::new();
        if !cursor.is_initial() {
            seen_cursors.insert(cursor.as_query().to_string());
        }

        info!(
            username = %self.username,
            from_cursor = %cursor.as_query(),
            probe = self.probe_known.is_some(),
            "Starting feed pagination"
        );

        loop {
            if self.cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }
            if stats.pages >= self.max_pages {
                warn!(
                    username = %self.username,
                    max_pages = self.max_pages,
                    "Page limit reached, stopping pagination"
                );
                break;
            }

            let page = self.client.fetch_page(&self.username, &cursor).await?;
            let index = stats.pages;
            stats.pages += 1;

            let mut next = page.cursor.clone();
            let repeated = match next.end_cursor.as_deref() {
                Some(end) => end == cursor.as_query() || !seen_cursors.insert(end.to_string()),
                None => false,
            };
            if next.has_next_page && (repeated || next.end_cursor.is_none()) {
                warn!(
                    username = %self.username,
                    page = index,
                    cursor = ?next.end_cursor,
                    "Feed cursor did not advance, stopping pagination"
                );
                next.has_next_page = false;
            }

            let mut images = Vec::with_capacity(page.items.len());
            let mut videos = 0;
            for item in page.items {
                if item.is_video {
                    videos += 1;
                    continue;
                }
                if let Err(reason) = item.validate() {
                    warn!(username = %self.username, page = index, %reason, "Skipping malformed item");
                    continue;
                }
                images.push(item);
            }

            let all_known = self.probe_known.as_ref().is_some_and(|known| {
                images.iter().all(|item| known.contains(&item.shortcode))
            });
            if all_known {
                debug!(username = %self.username, page = index, "Probe found no new items");
                next = PageCursor {
                    end_cursor: None,
                    has_next_page: false,
                };
            }

            stats.items += images.len();
            stats.videos_skipped += videos;

            let report = PageReport {
                index,
                request_cursor: cursor.as_query().to_string(),
                next: next.clone(),
                shortcodes: images.iter().map(|i| i.shortcode.clone()).collect(),
                videos_skipped: videos,
                total: page.total,
            };
            if pages.send(report).is_err() {
                debug!("Page receiver dropped, stopping pagination");
                break;
            }

            for item in images {
                let queued = QueuedItem { item, page: index };
                tokio::select! {
                    sent = items.send(queued) => {
                        if sent.is_err() {
                            debug!("Item receiver dropped, stopping pagination");
                            return Ok(stats);
                        }
                    }
                    _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
                }
            }

            if !next.has_next_page {
                break;
            }
            cursor = next;
        }

        info!(
            username = %self.username,
            pages = stats.pages,
            items = stats.items,
            videos_skipped = stats.videos_skipped,
            "Feed pagination finished"
        );
        Ok(stats)
    }
}
