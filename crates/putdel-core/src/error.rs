use std::time::Duration;

use putdel_store::StoreError;
use putdel_types::TypeError;
use thiserror::Error;

use crate::classify::{classify_store_error, FailureClass};

/// Errors produced while processing one event or signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The payload could not be decoded or named an invalid object.
    #[error("invalid event: {0}")]
    Event(#[from] TypeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A store call exceeded the configured bound.
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// The task running one event panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Where this error falls in the failure taxonomy.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Event(_) | Self::Config(_) | Self::Task(_) => FailureClass::Permanent,
            Self::Store(err) => classify_store_error(err),
            Self::Timeout { .. } => FailureClass::Transient,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
