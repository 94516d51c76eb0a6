//! Pipeline coordinator
//!
//! Owns one run end to end: output directory, checkpoint, rate limiter, HTTP
//! client, paginator and worker pool all live for exactly one call to
//! [`Coordinator::run`].
//!
//! ```text
//! paginator --(bounded queue)--> workers --(outcomes)--> coordinator
//!     \--------(page reports)-------------------------------^
//! ```
//!
//! The coordinator tracks which pages are fully handled and advances the
//! checkpoint cursor only past pages whose every image finished or was
//! skipped. A page with a failed or interrupted item keeps the cursor in front
//! of it, so a resumed run asks for that page again and the checkpoint skips
//! what is already on disk.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::{queue_capacity, MAX_PAGES};
use super::job::ItemState;
use super::progress::{human_bytes, LogLevel, ProgressEvent, ProgressSink};
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::worker::{WorkerOutcome, WorkerPool};
use crate::auth::Account;
use crate::config::Config;
use crate::error::{ScrapeError, ScrapeResult};
use crate::fetcher::{FeedPaginator, InstagramClient, PageReport, PaginationStats};
use crate::output::metadata::{self, PhotoRecord};
use crate::output::ProfileLayout;
use crate::resume::{CheckpointStore, StartMode};
use crate::shutdown::{CancelCause, CancelHandle};
use crate::{PageCursor, Username};

/// Aggregated result of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Profile that was scraped
    pub username: String,
    /// Images written this run
    pub downloaded: usize,
    /// Items skipped (checkpoint, existing file, duplicate)
    pub skipped: usize,
    /// Items that failed after retries
    pub failed: usize,
    /// Bytes written this run
    pub bytes: u64,
    /// Feed pages fetched
    pub pages: u32,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{}: {} downloaded ({}), {} skipped, {} failed, {} pages in {:.1}s",
            self.username,
            self.downloaded,
            human_bytes(self.bytes),
            self.skipped,
            self.failed,
            self.pages,
            self.elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug)]
struct PendingPage {
    report: PageReport,
    outstanding: HashMap<String, usize>,
    failed: bool,
}

impl PendingPage {
    fn new(report: PageReport) -> Self {
        let mut outstanding = HashMap::new();
        for code in &report.shortcodes {
            *outstanding.entry(code.clone()).or_insert(0) += 1;
        }
        Self {
            report,
            outstanding,
            failed: false,
        }
    }

    fn is_done(&self) -> bool {
        !self.failed && self.outstanding.is_empty()
    }
}

/// Decides how far the checkpoint cursor may advance
///
/// Pages are retired strictly in feed order.
#[derive(Debug, Default)]
pub(crate) struct CursorTracker {
    pages: BTreeMap<u32, PendingPage>,
}

impl CursorTracker {
    /// Register a page. Returns the new resume position if pages retired.
    pub(crate) fn on_page(&mut self, report: PageReport) -> Option<PageCursor> {
        self.pages.insert(report.index, PendingPage::new(report));
        self.retire()
    }

    /// Record a finished item. Returns the new resume position if pages retired.
    pub(crate) fn on_item(&mut self, page: u32, shortcode: &str, state: ItemState) -> Option<PageCursor> {
        let entry = self.pages.get_mut(&page)?;
        if state == ItemState::Failed {
            entry.failed = true;
        }
        if let Some(left) = entry.outstanding.get_mut(shortcode) {
            *left -= 1;
            if *left == 0 {
                entry.outstanding.remove(shortcode);
            }
        }
        self.retire()
    }

    fn retire(&mut self) -> Option<PageCursor> {
        let mut advanced = None;
        while let Some(entry) = self.pages.first_entry() {
            if !entry.get().is_done() {
                break;
            }
            let page = entry.remove();
            debug!(page = page.report.index, "Page fully handled");
            advanced = Some(page.report.next);
        }
        advanced
    }
}

/// Runs the download pipeline for one profile at a time
pub struct Coordinator {
    config: Config,
    account: Account,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelHandle,
    retry: RetryPolicy,
    base_url: Option<String>,
    max_pages: u32,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("account", &self.account)
            .field("retry", &self.retry)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Coordinator {
    /// Validate settings and credentials and prepare a coordinator.
    ///
    /// Missing or empty credentials fail with `auth-required`.
    pub fn new(
        config: Config,
        account: Account,
        sink: Arc<dyn ProgressSink>,
        cancel: CancelHandle,
    ) -> ScrapeResult<Self> {
        config.validate()?;
        account.validate().map_err(ScrapeError::AuthRequired)?;
        let retry = RetryPolicy::from_settings(&config.retry);
        Ok(Self {
            config,
            account,
            sink,
            cancel,
            retry,
            base_url: None,
            max_pages: MAX_PAGES,
        })
    }

    /// Send requests to a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Replace the retry policy built from the config
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the pagination page limit
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// The run's cancellation handle
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.emit(ProgressEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Download every image of `username` that is not already on disk.
    ///
    /// `force_restart` discards any checkpoint, `resume` continues from one,
    /// and neither refuses to overwrite a non-empty checkpoint.
    pub async fn run(
        &self,
        username: &Username,
        resume: bool,
        force_restart: bool,
    ) -> ScrapeResult<RunSummary> {
        let started = Instant::now();
        let layout = ProfileLayout::new(&self.config.output.base_directory, username);
        layout.create()?;
        let stale = layout.remove_stale_temps(self.config.download.download_timeout())?;
        if stale > 0 {
            debug!(removed = stale, "Removed leftover temp files");
        }

        let mode = StartMode::from_flags(resume, force_restart);
        let store = Arc::new(CheckpointStore::open(layout.clone(), username.as_str(), mode)?);
        let checkpoint = store.snapshot();
        let resumed = mode == StartMode::Resume && (!checkpoint.is_empty() || !checkpoint.cursor.is_empty());

        info!(
            username = %username,
            output = %layout.dir().display(),
            resumed,
            already_downloaded = checkpoint.count,
            workers = self.config.download.concurrent_downloads,
            "Starting scrape"
        );
        self.sink.emit(ProgressEvent::Started {
            username: username.to_string(),
            resumed,
            already_downloaded: checkpoint.count,
        });

        let limiter = Arc::new(RateLimiter::new(
            self.config.rate_limit.requests_per_minute,
            self.config.rate_limit.burst_size,
        ));
        let mut client = InstagramClient::new(
            &self.account,
            limiter,
            self.retry.clone(),
            self.cancel.clone(),
            self.config.download.download_timeout(),
        )?;
        if let Some(base_url) = &self.base_url {
            client = client.with_base_url(base_url.clone());
        }

        let mut paginator = FeedPaginator::new(client.clone(), username.clone(), self.cancel.clone())
            .with_max_pages(self.max_pages);
        if resume && checkpoint.is_complete() {
            let mut known = layout.existing_shortcodes()?;
            known.extend(checkpoint.downloaded.iter().cloned());
            debug!(known = known.len(), "Checkpoint complete, probing for new posts");
            paginator = paginator.probe(known);
        } else if resume && !checkpoint.cursor.is_empty() {
            paginator = paginator.starting_at(PageCursor::resume_from(&checkpoint.cursor));
        }

        let workers = self.config.download.concurrent_downloads;
        let (item_tx, item_rx) = mpsc::channel(queue_capacity(workers));
        let (page_tx, page_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let pool = WorkerPool::new(
            workers,
            client,
            Arc::clone(&store),
            Arc::clone(&self.sink),
            self.cancel.clone(),
        );
        let mut worker_set = pool.spawn(item_rx, outcome_tx);

        let cancel = self.cancel.clone();
        let paginator_task = tokio::spawn(async move {
            let result = paginator.run(item_tx, page_tx).await;
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    cancel.cancel(CancelCause::Fatal(e.to_string()));
                }
            }
            result
        });

        let mut tally = self.track(&store, page_rx, outcome_rx).await;

        while let Some(joined) = worker_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }
        let pagination = match paginator_task.await {
            Ok(result) => result,
            Err(e) => Err(ScrapeError::Fatal(format!("paginator task failed: {e}"))),
        };

        if let Err(e) = store.flush() {
            warn!(error = %e, "Failed to flush checkpoint");
        }
        let photos = std::mem::take(&mut tally.records);
        if let Err(e) = metadata::merge_and_write(&layout, username.as_str(), photos) {
            warn!(error = %e, "Failed to write metadata file");
        }

        let stats = match &pagination {
            Ok(stats) => *stats,
            Err(_) => PaginationStats {
                pages: tally.pages,
                ..PaginationStats::default()
            },
        };
        let summary = RunSummary {
            username: username.to_string(),
            downloaded: tally.downloaded,
            skipped: tally.skipped,
            failed: tally.failed,
            bytes: tally.bytes,
            pages: stats.pages,
            elapsed: started.elapsed(),
        };

        if let Some(e) = tally.fatal {
            error!(kind = %e.kind(), "Run aborted");
            return Err(e);
        }
        match pagination {
            Err(ScrapeError::Cancelled) | Ok(_) if self.cancel.is_cancelled() => {
                info!(
                    username = %username,
                    downloaded = summary.downloaded,
                    "Run interrupted, checkpoint saved"
                );
                self.log(
                    LogLevel::Warning,
                    format!("Interrupted after {} downloads; rerun with --resume to continue", summary.downloaded),
                );
                Err(ScrapeError::Cancelled)
            }
            Err(e) => {
                error!(kind = %e.kind(), error = %e, "Pagination failed");
                Err(e)
            }
            Ok(_) => {
                info!(
                    username = %username,
                    downloaded = summary.downloaded,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    bytes = summary.bytes,
                    pages = summary.pages,
                    "Scrape finished"
                );
                self.sink.emit(ProgressEvent::Done(summary.clone()));
                Ok(summary)
            }
        }
    }

    /// Consume page reports and worker outcomes until every worker is gone
    async fn track(
        &self,
        store: &CheckpointStore,
        mut pages: mpsc::UnboundedReceiver<PageReport>,
        mut outcomes: mpsc::UnboundedReceiver<WorkerOutcome>,
    ) -> Tally {
        let mut tracker = CursorTracker::default();
        let mut tally = Tally::default();
        let mut pages_open = true;

        loop {
            tokio::select! {
                biased;
                report = pages.recv(), if pages_open => match report {
                    Some(report) => self.on_page(store, &mut tracker, &mut tally, report),
                    None => pages_open = false,
                },
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => {
                        // The report for this page was sent before its items were queued
                        while let Ok(report) = pages.try_recv() {
                            self.on_page(store, &mut tracker, &mut tally, report);
                        }
                        let advanced = tracker.on_item(outcome.page, &outcome.item.shortcode, outcome.state);
                        tally.record(outcome);
                        self.sink.emit(ProgressEvent::Progress {
                            completed: tally.downloaded,
                            skipped: tally.skipped,
                            failed: tally.failed,
                            seen: tally.seen,
                        });
                        save_cursor(store, advanced);
                    }
                    None => break,
                },
            }
        }

        while let Ok(report) = pages.try_recv() {
            self.on_page(store, &mut tracker, &mut tally, report);
        }
        tally
    }

    fn on_page(
        &self,
        store: &CheckpointStore,
        tracker: &mut CursorTracker,
        tally: &mut Tally,
        report: PageReport,
    ) {
        tally.pages += 1;
        tally.seen += report.shortcodes.len();
        if report.videos_skipped > 0 {
            debug!(page = report.index, videos = report.videos_skipped, "Skipped video posts");
        }
        self.sink.emit(ProgressEvent::PageFetched {
            index: report.index,
            items: report.shortcodes.len(),
            total: report.total,
        });
        save_cursor(store, tracker.on_page(report));
    }
}

fn save_cursor(store: &CheckpointStore, advanced: Option<PageCursor>) {
    if let Some(cursor) = advanced {
        let end = cursor.end_cursor.as_deref().unwrap_or("");
        if let Err(e) = store.set_cursor(end, cursor.has_next_page) {
            warn!(error = %e, "Failed to save checkpoint cursor");
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    downloaded: usize,
    skipped: usize,
    failed: usize,
    bytes: u64,
    pages: u32,
    seen: usize,
    records: Vec<PhotoRecord>,
    fatal: Option<ScrapeError>,
}

impl Tally {
    fn record(&mut self, outcome: WorkerOutcome) {
        match outcome.state {
            ItemState::Completed => {
                self.downloaded += 1;
                self.bytes += outcome.bytes;
                self.records.push(PhotoRecord::from_item(&outcome.item, outcome.bytes));
            }
            ItemState::Skipped => self.skipped += 1,
            ItemState::Failed => {
                self.failed += 1;
                if let Some(e) = outcome.error {
                    if e.aborts_pipeline() && self.fatal.is_none() {
                        self.fatal = Some(e);
                    }
                }
            }
            ItemState::Queued | ItemState::Active => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: u32, codes: &[&str], next: Option<&str>, has_next: bool) -> PageReport {
        PageReport {
            index,
            request_cursor: if index == 0 { String::new() } else { format!("c{index}") },
            next: PageCursor {
                end_cursor: next.map(str::to_string),
                has_next_page: has_next,
            },
            shortcodes: codes.iter().map(|c| c.to_string()).collect(),
            videos_skipped: 0,
            total: None,
        }
    }

    #[test]
    fn test_cursor_advances_in_page_order() {
        let mut tracker = CursorTracker::default();
        assert_eq!(tracker.on_page(report(0, &["A", "B"], Some("c1"), true)), None);
        assert_eq!(tracker.on_page(report(1, &["C"], None, false)), None);

        // Page 1 finishes first but page 0 is still open
        assert_eq!(tracker.on_item(1, "C", ItemState::Completed), None);
        assert_eq!(tracker.on_item(0, "A", ItemState::Skipped), None);

        let cursor = tracker.on_item(0, "B", ItemState::Completed).unwrap();
        assert_eq!(cursor, PageCursor { end_cursor: None, has_next_page: false });
    }

    #[test]
    fn test_failed_item_holds_cursor() {
        let mut tracker = CursorTracker::default();
        tracker.on_page(report(0, &["A"], Some("c1"), true));
        tracker.on_page(report(1, &["B"], Some("c2"), true));

        assert_eq!(tracker.on_item(0, "A", ItemState::Failed), None);
        assert_eq!(tracker.on_item(1, "B", ItemState::Completed), None);
    }

    #[test]
    fn test_empty_page_retires_immediately() {
        let mut tracker = CursorTracker::default();
        let cursor = tracker.on_page(report(0, &[], Some("c1"), true)).unwrap();
        assert_eq!(cursor.end_cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn test_duplicate_within_page_needs_both_outcomes() {
        let mut tracker = CursorTracker::default();
        tracker.on_page(report(0, &["X", "X"], Some("c1"), true));
        assert_eq!(tracker.on_item(0, "X", ItemState::Completed), None);
        assert!(tracker.on_item(0, "X", ItemState::Skipped).is_some());
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            username: "nasa".into(),
            downloaded: 3,
            bytes: 2048,
            pages: 1,
            ..RunSummary::default()
        };
        assert_eq!(
            summary.to_string(),
            "@nasa: 3 downloaded (2.0 KB), 0 skipped, 0 failed, 1 pages in 0.0s"
        );
    }
}
