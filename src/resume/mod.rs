//! Resume capability for profile downloads
//!
//! Provides the per-profile checkpoint with atomic writes and file locking.

pub mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointStore, StartMode, CHECKPOINT_VERSION};

/// Checkpoint errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckpointError {
    /// Stored schema version differs from the one this build writes
    #[error("checkpoint version {found} is not supported (expected {expected})")]
    Incompatible {
        /// Version found on disk (0 when unreadable)
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// A non-empty checkpoint exists and neither resume nor restart was requested
    #[error(
        "a checkpoint with {count} downloads already exists for '{username}'; use --resume or --force-restart"
    )]
    NotEmpty {
        /// Profile the checkpoint belongs to
        username: String,
        /// Downloads recorded in it
        count: usize,
    },

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// File lock could not be taken
    #[error("lock error: {0}")]
    Lock(String),

    /// Checkpoint JSON could not be read or written
    #[error("serialization error: {0}")]
    Serialization(String),
}
