//! Failure taxonomy shared by the indexer and the deleter.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use putdel_store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{PipelineError, PipelineResult};

/// How a failure is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Expected under redelivery; completes as success.
    Benign,
    /// Infrastructure hiccup; safe to re-drive the same input later.
    Transient,
    /// Will fail the same way again; logged and dropped.
    Permanent,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Benign => write!(f, "benign"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Classify a store failure.
pub fn classify_store_error(err: &StoreError) -> FailureClass {
    match err {
        StoreError::ConditionFailed { .. }
        | StoreError::ObjectNotFound { .. }
        | StoreError::VersionMismatch { .. } => FailureClass::Benign,
        StoreError::TransactionCanceled { reasons } => {
            if reasons.iter().any(|r| r.is_condition_failure()) {
                FailureClass::Benign
            } else {
                FailureClass::Transient
            }
        }
        StoreError::TransactionConflict(_) | StoreError::Unavailable(_) => FailureClass::Transient,
        StoreError::AccessDenied(_)
        | StoreError::TableNotFound(_)
        | StoreError::Serialization(_) => FailureClass::Permanent,
    }
}

/// Run one store call under `limit`, failing the invocation on expiry.
///
/// Dropping the inner future on timeout is safe: store writes are atomic.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> PipelineResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::Timeout { operation, limit }),
    }
}

/// Log a failed invocation at the level its class calls for.
pub(crate) fn report_failure(unit: &'static str, subject: &str, err: &PipelineError) {
    match err.class() {
        FailureClass::Transient => {
            warn!(unit, subject, error = %err, retriable = true, "invocation failed; needs reconciliation");
        }
        FailureClass::Permanent => {
            error!(unit, subject, error = %err, retriable = false, "invocation failed; event dropped");
        }
        FailureClass::Benign => {}
    }
}
