//! Run-wide cancellation.
//!
//! A [`CancelHandle`] is created once per run and cloned into the paginator,
//! every worker, the HTTP client and the rate limiter. Cancelling it wakes
//! every waiter. The first cause recorded wins; later calls are no-ops.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a run was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// Ctrl+C or another termination signal
    Interrupted,
    /// A non-retryable error that stops the pipeline
    Fatal(String),
    /// The coordinator finished and is tearing tasks down
    Shutdown,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => f.write_str("interrupted"),
            Self::Fatal(reason) => write!(f, "fatal error: {reason}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Cloneable cancellation signal shared by all tasks of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
}

impl CancelHandle {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with the given cause. Only the first cause is kept.
    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded cause, if cancelled.
    pub fn cause(&self) -> Option<&CancelCause> {
        self.cause.get()
    }

    /// Resolve once cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Cancel `handle` when the process receives Ctrl+C.
pub fn install_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received - flushing checkpoint before exit");
            handle.cancel(CancelCause::Interrupted);
        }
    });
}
