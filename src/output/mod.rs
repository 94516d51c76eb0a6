//! On-disk layout for a profile
//!
//! ```text
//! <output>/<username>/
//!     {shortcode}.jpg
//!     .checkpoint.json
//!     .checkpoint.lock
//!     metadata.json
//! ```
//!
//! Images are written to `.{shortcode}.*.part` temp files in the same directory
//! and renamed into place, so a `.jpg` is never observed half-written.

pub mod metadata;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::Username;

/// Checkpoint file name
pub const CHECKPOINT_FILE: &str = ".checkpoint.json";

/// Lock file guarding checkpoint writes
pub const LOCK_FILE: &str = ".checkpoint.lock";

/// Metadata sidecar file name
pub const METADATA_FILE: &str = "metadata.json";

/// Image file extension
pub const MEDIA_EXTENSION: &str = "jpg";

/// Suffix of in-progress downloads
pub const TEMP_SUFFIX: &str = ".part";

/// Paths for one profile's output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLayout {
    dir: PathBuf,
}

impl ProfileLayout {
    /// Layout for `username` under `base`
    pub fn new(base: &Path, username: &Username) -> Self {
        Self {
            dir: base.join(username.as_str()),
        }
    }

    /// Layout rooted at an existing profile directory
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Profile directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the profile directory
    pub fn create(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// `.checkpoint.json`
    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// `.checkpoint.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// `metadata.json`
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// `{shortcode}.jpg`
    pub fn file_name(shortcode: &str) -> String {
        format!("{shortcode}.{MEDIA_EXTENSION}")
    }

    /// Full destination path for a short-code
    pub fn media_path(&self, shortcode: &str) -> PathBuf {
        self.dir.join(Self::file_name(shortcode))
    }

    /// Temp file prefix for a short-code
    pub fn temp_prefix(shortcode: &str) -> String {
        format!(".{shortcode}.")
    }

    /// Whether the image exists with non-zero size
    pub fn is_present(&self, shortcode: &str) -> bool {
        std::fs::metadata(self.media_path(shortcode))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Short-codes of every non-empty image already in the directory
    pub fn existing_shortcodes(&self) -> io::Result<HashSet<String>> {
        let mut found = HashSet::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MEDIA_EXTENSION) {
                continue;
            }
            let non_empty = entry.metadata().map(|m| m.is_file() && m.len() > 0)?;
            if !non_empty {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.insert(stem.to_string());
            }
        }
        Ok(found)
    }

    /// Delete leftover temp files from an interrupted run.
    ///
    /// Only files untouched for at least `idle` are removed. Temps of a
    /// download still in flight elsewhere are younger than that.
    pub fn remove_stale_temps(&self, idle: Duration) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                if !idle_for(&entry, idle) {
                    continue;
                }
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(file = name, error = %e, "Failed to remove stale temp file"),
                }
            }
        }
        if removed > 0 {
            debug!(dir = %self.dir.display(), removed, "Removed stale temp files");
        }
        Ok(removed)
    }
}

fn idle_for(entry: &std::fs::DirEntry, idle: Duration) -> bool {
    if idle.is_zero() {
        return true;
    }
    entry
        .metadata()
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= idle)
}
