//! Pipeline constants

use std::time::Duration;

/// Items requested per feed page
pub const PAGE_SIZE: u32 = 12;

/// Hard stop for pagination in case the cursor never repeats but never ends.
/// 5,000 pages of 12 is far beyond any real profile.
pub const MAX_PAGES: u32 = 5_000;

/// Checkpoint is written after this many new downloads
pub const CHECKPOINT_BATCH_SIZE: usize = 10;

/// Checkpoint is written at least this often while downloads complete
pub const CHECKPOINT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// How often paused workers re-check the sink
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bounded queue between paginator and workers
pub fn queue_capacity(workers: usize) -> usize {
    (workers * 2).max(1)
}
