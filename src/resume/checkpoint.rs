//! Per-profile checkpoint
//!
//! Stored at `<output>/<username>/.checkpoint.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "username": "nasa",
//!   "cursor": "QVFD...",
//!   "has_next_page": true,
//!   "downloaded": ["AbC", "XyZ"],
//!   "count": 2,
//!   "started_at": "2024-05-01T10:00:00Z",
//!   "updated_at": "2024-05-01T10:03:12Z"
//! }
//! ```
//!
//! `downloaded` only ever grows during a run. Writes go through a temp file,
//! fsync and rename while holding an exclusive lock on `.checkpoint.lock`, so
//! readers see the old file or the new one, never a mix. On load, short-codes
//! whose image is missing from disk are dropped.

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::CheckpointError;
use crate::downloader::config::{CHECKPOINT_BATCH_SIZE, CHECKPOINT_FLUSH_INTERVAL};
use crate::output::ProfileLayout;

/// Current checkpoint schema version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Maximum checkpoint file size (16 MB) to prevent memory exhaustion
pub const MAX_CHECKPOINT_SIZE: u64 = 16 * 1024 * 1024;

fn default_true() -> bool {
    true
}

/// Download progress for one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version
    pub version: u32,
    /// Profile username
    pub username: String,
    /// Feed cursor to continue from; empty means the first page
    #[serde(default)]
    pub cursor: String,
    /// False once the feed has been walked to the end
    #[serde(default = "default_true")]
    pub has_next_page: bool,
    /// Short-codes already on disk
    #[serde(default)]
    pub downloaded: BTreeSet<String>,
    /// Size of `downloaded`
    #[serde(default)]
    pub count: usize,
    /// When this checkpoint was created
    pub started_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Empty checkpoint for `username`
    pub fn new(username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            username: username.into(),
            cursor: String::new(),
            has_next_page: true,
            downloaded: BTreeSet::new(),
            count: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// No downloads recorded
    pub fn is_empty(&self) -> bool {
        self.downloaded.is_empty()
    }

    /// The whole feed was walked
    pub fn is_complete(&self) -> bool {
        !self.has_next_page
    }

    /// Whether `shortcode` is recorded
    pub fn contains(&self, shortcode: &str) -> bool {
        self.downloaded.contains(shortcode)
    }
}

/// How to treat an existing checkpoint at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Start over, but refuse to discard a non-empty checkpoint
    Fresh,
    /// Continue from the existing checkpoint, failing if it cannot be read
    Resume,
    /// Discard any existing checkpoint
    ForceRestart,
}

impl StartMode {
    /// Map the `--resume` / `--force-restart` flags
    pub fn from_flags(resume: bool, force_restart: bool) -> Self {
        if force_restart {
            Self::ForceRestart
        } else if resume {
            Self::Resume
        } else {
            Self::Fresh
        }
    }
}

#[derive(Debug)]
struct State {
    checkpoint: Checkpoint,
    pending: usize,
    last_flush: Instant,
}

/// Mutex-guarded checkpoint with batched persistence
#[derive(Debug)]
pub struct CheckpointStore {
    layout: ProfileLayout,
    state: Mutex<State>,
    batch_size: usize,
    flush_interval: Duration,
}

impl CheckpointStore {
    /// Wrap an in-memory checkpoint
    pub fn new(layout: ProfileLayout, checkpoint: Checkpoint) -> Self {
        Self {
            layout,
            state: Mutex::new(State {
                checkpoint,
                pending: 0,
                last_flush: Instant::now(),
            }),
            batch_size: CHECKPOINT_BATCH_SIZE,
            flush_interval: CHECKPOINT_FLUSH_INTERVAL,
        }
    }

    /// Override the batching thresholds
    pub fn with_batching(mut self, batch_size: usize, flush_interval: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.flush_interval = flush_interval;
        self
    }

    /// Load or create the checkpoint according to `mode`.
    ///
    /// - `ForceRestart` deletes any existing file.
    /// - `Resume` loads the file if present; an unreadable or foreign-version
    ///   file is an error.
    /// - `Fresh` refuses a non-empty checkpoint and silently replaces an
    ///   unreadable one.
    pub fn open(
        layout: ProfileLayout,
        username: &str,
        mode: StartMode,
    ) -> Result<Self, CheckpointError> {
        let checkpoint = match mode {
            StartMode::ForceRestart => {
                Self::clear(&layout)?;
                Checkpoint::new(username)
            }
            StartMode::Resume => match Self::load(&layout)? {
                Some(existing) if existing.username == username => {
                    info!(
                        username,
                        downloaded = existing.count,
                        cursor = %existing.cursor,
                        complete = existing.is_complete(),
                        "Resuming from checkpoint"
                    );
                    existing
                }
                Some(existing) => {
                    return Err(CheckpointError::Serialization(format!(
                        "checkpoint belongs to '{}', not '{username}'",
                        existing.username
                    )))
                }
                None => Checkpoint::new(username),
            },
            StartMode::Fresh => match Self::load(&layout) {
                Ok(Some(existing)) if !existing.is_empty() => {
                    return Err(CheckpointError::NotEmpty {
                        username: username.to_string(),
                        count: existing.count,
                    })
                }
                Ok(_) => Checkpoint::new(username),
                Err(e @ CheckpointError::Incompatible { .. })
                | Err(e @ CheckpointError::Serialization(_)) => {
                    warn!(username, error = %e, "Discarding unusable checkpoint");
                    Self::clear(&layout)?;
                    Checkpoint::new(username)
                }
                Err(e) => return Err(e),
            },
        };

        let store = Self::new(layout, checkpoint);
        store.save()?;
        Ok(store)
    }

    /// Read the checkpoint from disk, dropping entries whose file is gone.
    ///
    /// Returns `Ok(None)` when no checkpoint exists.
    pub fn load(layout: &ProfileLayout) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = layout.checkpoint_path();
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::Io(e.to_string())),
        };
        if metadata.len() > MAX_CHECKPOINT_SIZE {
            return Err(CheckpointError::Serialization(format!(
                "checkpoint is {} bytes, larger than the {} byte limit",
                metadata.len(),
                MAX_CHECKPOINT_SIZE
            )));
        }

        let contents =
            std::fs::read_to_string(&path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        let value: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        if found != CHECKPOINT_VERSION {
            warn!(
                found_version = found,
                expected_version = CHECKPOINT_VERSION,
                "Checkpoint schema version mismatch"
            );
            return Err(CheckpointError::Incompatible {
                found,
                expected: CHECKPOINT_VERSION,
            });
        }

        let mut checkpoint: Checkpoint = serde_json::from_value(value)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let before = checkpoint.downloaded.len();
        checkpoint.downloaded.retain(|code| layout.is_present(code));
        let dropped = before - checkpoint.downloaded.len();
        if dropped > 0 {
            warn!(
                username = %checkpoint.username,
                dropped,
                "Checkpoint listed files missing from disk; they will be downloaded again"
            );
        }
        checkpoint.count = checkpoint.downloaded.len();

        debug!(
            path = %path.display(),
            downloaded = checkpoint.count,
            "Checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    /// Delete the checkpoint file if present
    pub fn clear(layout: &ProfileLayout) -> Result<(), CheckpointError> {
        match std::fs::remove_file(layout.checkpoint_path()) {
            Ok(()) => {
                info!(dir = %layout.dir().display(), "Checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Io(e.to_string())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the current state now
    pub fn save(&self) -> Result<(), CheckpointError> {
        let mut state = self.state();
        self.write_locked(&mut state)
    }

    /// Write if anything changed since the last write
    pub fn flush(&self) -> Result<(), CheckpointError> {
        let mut state = self.state();
        if state.pending == 0 {
            return Ok(());
        }
        self.write_locked(&mut state)
    }

    /// Record a finished download.
    ///
    /// Returns `false` if the short-code was already recorded. The file is
    /// written once enough downloads or time have accumulated.
    pub fn mark_downloaded(&self, shortcode: &str) -> Result<bool, CheckpointError> {
        let mut state = self.state();
        if !state.checkpoint.downloaded.insert(shortcode.to_string()) {
            return Ok(false);
        }
        state.checkpoint.count = state.checkpoint.downloaded.len();
        state.checkpoint.updated_at = Utc::now();
        state.pending += 1;
        self.maybe_write(&mut state)?;
        Ok(true)
    }

    /// Whether the short-code is already recorded
    pub fn should_skip(&self, shortcode: &str) -> bool {
        self.state().checkpoint.contains(shortcode)
    }

    /// Record the feed position to resume from
    pub fn set_cursor(&self, cursor: &str, has_next_page: bool) -> Result<(), CheckpointError> {
        let mut state = self.state();
        if state.checkpoint.cursor == cursor && state.checkpoint.has_next_page == has_next_page {
            return Ok(());
        }
        state.checkpoint.cursor = cursor.to_string();
        state.checkpoint.has_next_page = has_next_page;
        state.checkpoint.updated_at = Utc::now();
        state.pending += 1;
        self.maybe_write(&mut state)
    }

    /// Copy of the in-memory checkpoint
    pub fn snapshot(&self) -> Checkpoint {
        self.state().checkpoint.clone()
    }

    /// Number of recorded downloads
    pub fn downloaded_count(&self) -> usize {
        self.state().checkpoint.count
    }

    /// Profile layout this store writes into
    pub fn layout(&self) -> &ProfileLayout {
        &self.layout
    }

    fn maybe_write(&self, state: &mut State) -> Result<(), CheckpointError> {
        if state.pending >= self.batch_size || state.last_flush.elapsed() >= self.flush_interval {
            self.write_locked(state)?;
        }
        Ok(())
    }

    fn write_locked(&self, state: &mut State) -> Result<(), CheckpointError> {
        write_atomic(&self.layout, &state.checkpoint)?;
        state.pending = 0;
        state.last_flush = Instant::now();
        Ok(())
    }
}

/// Serialize and atomically replace the checkpoint file under the profile lock
fn write_atomic(layout: &ProfileLayout, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    let dir = layout.dir();
    std::fs::create_dir_all(dir).map_err(|e| CheckpointError::Io(e.to_string()))?;

    let json = serde_json::to_string_pretty(checkpoint)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(layout.lock_path())
        .map_err(|e| CheckpointError::Lock(format!("Failed to create lock file: {e}")))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| CheckpointError::Lock(format!("Failed to acquire write lock: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CheckpointError::Io(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| CheckpointError::Io(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| CheckpointError::Io(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| CheckpointError::Io(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(layout.checkpoint_path())
        .map_err(|e| CheckpointError::Io(format!("Failed to persist temp file: {e}")))?;

    if let Ok(dir) = std::fs::File::open(dir) {
        let _ = dir.sync_all();
    }

    debug!(
        username = %checkpoint.username,
        downloaded = checkpoint.count,
        cursor = %checkpoint.cursor,
        "Checkpoint saved"
    );
    Ok(())
}
