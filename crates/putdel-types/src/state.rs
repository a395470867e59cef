//! Per-object lifecycle.
//!
//! ```text
//! unindexed → indexing-in-flight → indexed → deletion-in-flight → deleted
//! ```
//!
//! No transition skips `indexed`. Redelivered notifications and signals are
//! absorbed by the states that already reflect them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectState {
    Unindexed,
    IndexingInFlight,
    Indexed,
    DeletionInFlight,
    Deleted,
}

/// Something that happened to an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
    /// A notification reached the indexer.
    BeginIndexing,
    /// The conditional write was acknowledged (or found the row present).
    IndexCommitted,
    /// The conditional write failed; nothing was recorded.
    IndexFailed,
    /// A commit signal reached the deleter.
    BeginDeletion,
    /// The blob is gone.
    DeletionCompleted,
    /// The delete failed; the blob may still exist.
    DeletionFailed,
}

impl ObjectState {
    /// Apply a transition, rejecting any that would delete before indexing.
    pub fn advance(self, transition: Transition) -> Result<Self, TypeError> {
        use ObjectState::*;
        use Transition::*;

        let next = match (self, transition) {
            (Unindexed, BeginIndexing) => IndexingInFlight,
            (IndexingInFlight, IndexCommitted) => Indexed,
            (IndexingInFlight, IndexFailed) => Unindexed,

            // Duplicate notifications after the commit change nothing.
            (
                Indexed | DeletionInFlight | Deleted,
                BeginIndexing | IndexCommitted | IndexFailed,
            ) => self,

            (Indexed, BeginDeletion) => DeletionInFlight,
            (DeletionInFlight, DeletionCompleted) => Deleted,
            (DeletionInFlight, DeletionFailed) => Indexed,

            // Terminal: duplicate signals collapse.
            (Deleted, BeginDeletion | DeletionCompleted | DeletionFailed) => Deleted,

            (from, transition) => {
                return Err(TypeError::InvalidTransition { from, transition });
            }
        };
        Ok(next)
    }

    /// Returns `true` once the index row exists.
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Indexed | Self::DeletionInFlight | Self::Deleted)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Deleted
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unindexed => "unindexed",
            Self::IndexingInFlight => "indexing-in-flight",
            Self::Indexed => "indexed",
            Self::DeletionInFlight => "deletion-in-flight",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}
