//! Download worker pool
//!
//! `W` tasks share the receiving end of the bounded item queue. Each item is
//! checked against the checkpoint and the output directory, then streamed to
//! disk through [`InstagramClient::download_to`], which takes a rate-limiter
//! permit per attempt and applies the retry policy.
//!
//! Workers share no mutable state besides the checkpoint store, the rate
//! limiter, the claimed short-code set and the active-download gauge. One
//! item failing never stops the pool; only errors that invalidate the whole
//! session cancel the run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::config::PAUSE_POLL_INTERVAL;
use super::job::ItemState;
use super::progress::{ProgressEvent, ProgressSink, SkipReason};
use crate::error::ScrapeError;
use crate::fetcher::{InstagramClient, QueuedItem};
use crate::resume::CheckpointStore;
use crate::shutdown::{CancelCause, CancelHandle};
use crate::MediaItem;

/// Result of handling one queued item
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// The item
    pub item: MediaItem,
    /// Page the item came from
    pub page: u32,
    /// Terminal state reached
    pub state: ItemState,
    /// Bytes written, zero unless completed
    pub bytes: u64,
    /// Why it was skipped
    pub skip: Option<SkipReason>,
    /// Last error for failed items
    pub error: Option<ScrapeError>,
}

impl WorkerOutcome {
    fn skipped(queued: QueuedItem, reason: SkipReason) -> Self {
        Self {
            item: queued.item,
            page: queued.page,
            state: ItemState::Skipped,
            bytes: 0,
            skip: Some(reason),
            error: None,
        }
    }
}

struct Shared {
    client: InstagramClient,
    checkpoint: Arc<CheckpointStore>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelHandle,
    claimed: Mutex<HashSet<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the active gauge when a download ends, however it ends
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool of download tasks
#[derive(Clone)]
pub struct WorkerPool {
    workers: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("active", &self.active())
            .finish()
    }
}

impl WorkerPool {
    /// Pool of `workers` tasks (at least one)
    pub fn new(
        workers: usize,
        client: InstagramClient,
        checkpoint: Arc<CheckpointStore>,
        sink: Arc<dyn ProgressSink>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            workers: workers.max(1),
            shared: Arc::new(Shared {
                client,
                checkpoint,
                sink,
                cancel,
                claimed: Mutex::new(HashSet::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of worker tasks
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Downloads in flight right now
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous downloads seen so far
    pub fn peak_active(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    /// Spawn the workers.
    ///
    /// Each worker drains `queue` until it is closed and empty, or the run is
    /// cancelled, sending one [`WorkerOutcome`] per finished item. Items
    /// interrupted by cancellation produce no outcome.
    pub fn spawn(
        &self,
        queue: mpsc::Receiver<QueuedItem>,
        outcomes: mpsc::UnboundedSender<WorkerOutcome>,
    ) -> JoinSet<()> {
        let queue = Arc::new(tokio::sync::Mutex::new(queue));
        let mut set = JoinSet::new();
        for id in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            let queue = Arc::clone(&queue);
            let outcomes = outcomes.clone();
            set.spawn(async move {
                worker_loop(id, shared, queue, outcomes).await;
            });
        }
        debug!(workers = self.workers, "Worker pool started");
        set
    }
}

async fn worker_loop(
    id: usize,
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedItem>>>,
    outcomes: mpsc::UnboundedSender<WorkerOutcome>,
) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                item = queue.recv() => item,
                _ = shared.cancel.cancelled() => None,
            }
        };
        let Some(queued) = next else { break };

        if let Some(outcome) = shared.process(queued).await {
            if outcomes.send(outcome).is_err() {
                break;
            }
        }
        if shared.cancel.is_cancelled() {
            break;
        }
    }
    debug!(worker = id, "Worker stopped");
}

impl Shared {
    fn claim(&self, shortcode: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shortcode.to_string())
    }

    fn skip(&self, queued: QueuedItem, reason: SkipReason) -> WorkerOutcome {
        debug!(shortcode = %queued.item.shortcode, %reason, "Skipping item");
        self.sink.emit(ProgressEvent::DownloadSkipped {
            shortcode: queued.item.shortcode.clone(),
            reason,
        });
        WorkerOutcome::skipped(queued, reason)
    }

    /// Wait while the sink reports paused. Returns false if cancelled.
    async fn wait_while_paused(&self) -> bool {
        let mut logged = false;
        while self.sink.is_paused() {
            if !logged {
                info!("Downloads paused");
                logged = true;
            }
            tokio::select! {
                _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
                _ = self.cancel.cancelled() => return false,
            }
        }
        !self.cancel.is_cancelled()
    }

    async fn process(&self, queued: QueuedItem) -> Option<WorkerOutcome> {
        let code = queued.item.shortcode.clone();
        let layout = self.checkpoint.layout();

        if !self.claim(&code) {
            return Some(self.skip(queued, SkipReason::Duplicate));
        }
        if self.checkpoint.should_skip(&code) {
            return Some(self.skip(queued, SkipReason::InCheckpoint));
        }
        if layout.is_present(&code) {
            if let Err(e) = self.checkpoint.mark_downloaded(&code) {
                warn!(shortcode = %code, error = %e, "Failed to record existing file in checkpoint");
            }
            return Some(self.skip(queued, SkipReason::OnDisk));
        }

        if !self.wait_while_paused().await {
            return None;
        }

        let mut state = ItemState::Queued;
        advance(&mut state, ItemState::Active);
        let _active = ActiveGuard::enter(&self.active, &self.peak);
        self.sink.emit(ProgressEvent::DownloadStarted {
            shortcode: code.clone(),
        });

        let dest = layout.media_path(&code);
        let result = self
            .client
            .download_to(&queued.item.display_url, &dest, &code)
            .await;
        self.sink
            .emit(ProgressEvent::RateLimit(self.client.rate_limiter().snapshot()));

        match result {
            Ok(bytes) => {
                if let Err(e) = self.checkpoint.mark_downloaded(&code) {
                    warn!(shortcode = %code, error = %e, "Failed to record download in checkpoint");
                }
                advance(&mut state, ItemState::Completed);
                debug!(shortcode = %code, bytes, "Download complete");
                self.sink.emit(ProgressEvent::DownloadCompleted {
                    shortcode: code,
                    bytes,
                });
                Some(WorkerOutcome {
                    item: queued.item,
                    page: queued.page,
                    state,
                    bytes,
                    skip: None,
                    error: None,
                })
            }
            Err(ScrapeError::Cancelled) => None,
            Err(e) => {
                if e.aborts_pipeline() {
                    warn!(shortcode = %code, kind = %e.kind(), "Session rejected, cancelling run");
                    self.cancel.cancel(CancelCause::Fatal(e.to_string()));
                } else {
                    warn!(shortcode = %code, kind = %e.kind(), error = %e, "Download failed");
                }
                advance(&mut state, ItemState::Failed);
                self.sink.emit(ProgressEvent::DownloadFailed {
                    shortcode: code,
                    kind: e.kind(),
                    error: e.to_string(),
                });
                Some(WorkerOutcome {
                    item: queued.item,
                    page: queued.page,
                    state,
                    bytes: 0,
                    skip: None,
                    error: Some(e),
                })
            }
        }
    }
}

fn advance(state: &mut ItemState, next: ItemState) {
    match state.transition(next) {
        Ok(moved) => *state = moved,
        Err(reason) => debug_assert!(false, "{reason}"),
    }
}
