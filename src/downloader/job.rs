//! Per-item lifecycle tracking

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where one media item is in the pipeline
///
/// Transitions are `Queued -> Active -> {Completed, Failed, Skipped}`, with
/// `Queued -> Skipped` allowed for items found on disk before any work starts.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Emitted by the paginator, waiting for a worker
    Queued,
    /// A worker is downloading it
    Active,
    /// File written and recorded in the checkpoint
    Completed,
    /// Retries exhausted or a permanent error
    Failed,
    /// Already downloaded, or a duplicate of an in-flight item
    Skipped,
}

impl ItemState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether moving to `next` is allowed
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Active)
                | (Self::Queued, Self::Skipped)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
                | (Self::Active, Self::Skipped)
        )
    }

    /// Move to `next`, or report the illegal transition
    pub fn transition(self, next: ItemState) -> Result<ItemState, String> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(format!("illegal item transition {self} -> {next}"))
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = ItemState::Queued
            .transition(ItemState::Active)
            .and_then(|s| s.transition(ItemState::Completed))
            .unwrap();
        assert_eq!(state, ItemState::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [ItemState::Completed, ItemState::Failed, ItemState::Skipped] {
            for next in [
                ItemState::Queued,
                ItemState::Active,
                ItemState::Completed,
                ItemState::Failed,
                ItemState::Skipped,
            ] {
                assert!(terminal.transition(next).is_err(), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_skip_before_start() {
        assert!(ItemState::Queued.can_transition_to(ItemState::Skipped));
        assert!(!ItemState::Queued.can_transition_to(ItemState::Completed));
    }
}
