use putdel_types::IndexKey;

use crate::transaction::CancellationReason;

/// Errors from index store and blob store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A single-item conditional write found its condition false.
    #[error("conditional check failed for {key}")]
    ConditionFailed { key: IndexKey },

    /// A transaction was cancelled; `reasons` has one entry per item.
    #[error("transaction cancelled: {}", summarize(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    /// Another transaction touched the same rows concurrently.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// The named table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The object does not exist in the blob store.
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// The object exists but at a different version than requested.
    #[error("version mismatch for {bucket}/{key}: expected {expected}, found {actual}")]
    VersionMismatch {
        bucket: String,
        key: String,
        expected: String,
        actual: String,
    },

    /// The caller lacks permission for the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The backend could not be reached or refused service.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn summarize(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_message_lists_reasons() {
        let err = StoreError::TransactionCanceled {
            reasons: vec![CancellationReason::None, CancellationReason::ConditionalCheckFailed],
        };
        assert_eq!(
            err.to_string(),
            "transaction cancelled: None, ConditionalCheckFailed"
        );
    }
}
