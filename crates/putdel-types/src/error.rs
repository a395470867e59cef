use thiserror::Error;

use crate::state::{ObjectState, Transition};

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The notification payload could not be decoded.
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),

    /// A field of an object reference is missing or invalid.
    #[error("invalid object reference: {field}: {reason}")]
    InvalidReference { field: &'static str, reason: String },

    /// A lifecycle transition that would skip a required state.
    #[error("invalid lifecycle transition {transition:?} from {from:?}")]
    InvalidTransition {
        from: ObjectState,
        transition: Transition,
    },
}

impl From<serde_json::Error> for TypeError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedEvent(err.to_string())
    }
}
