//! Conditional write vocabulary shared by single puts and transactions.

use std::fmt;

use putdel_types::{IndexKey, IndexRecord};
use serde::{Deserialize, Serialize};

/// Precondition evaluated atomically against the row at the item's key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Unconditional.
    None,
    /// The row must not exist (`attribute_not_exists(SK)`).
    IfAbsent,
}

impl Condition {
    /// Evaluate against whether a row currently exists.
    pub fn holds(self, exists: bool) -> bool {
        match self {
            Self::None => true,
            Self::IfAbsent => !exists,
        }
    }
}

/// One item of an all-or-nothing transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactItem {
    /// Check a condition without writing.
    ConditionCheck { key: IndexKey, condition: Condition },
    /// Write a row if the condition holds.
    Put {
        record: IndexRecord,
        condition: Condition,
    },
}

impl TransactItem {
    pub fn key(&self) -> IndexKey {
        match self {
            Self::ConditionCheck { key, .. } => key.clone(),
            Self::Put { record, .. } => record.index_key(),
        }
    }

    pub fn condition(&self) -> Condition {
        match self {
            Self::ConditionCheck { condition, .. } | Self::Put { condition, .. } => *condition,
        }
    }
}

/// Why a transaction item caused (or did not cause) cancellation.
///
/// A cancelled transaction reports one reason per item, in item order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    /// This item's condition held.
    None,
    /// This item's condition was false.
    ConditionalCheckFailed,
}

impl CancellationReason {
    pub fn is_condition_failure(&self) -> bool {
        *self == Self::ConditionalCheckFailed
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::ConditionalCheckFailed => write!(f, "ConditionalCheckFailed"),
        }
    }
}
