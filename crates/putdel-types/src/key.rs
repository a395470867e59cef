//! Deterministic index key derivation.
//!
//! Keys are pure functions of an [`ObjectReference`]: no randomness, no
//! clock, no process state. Any reader (the indexer, the reconciliation
//! sweep, an operator with the CLI) derives the same `(PK, SK)` for the same
//! object.
//!
//! Layout:
//!
//! - `PK = OBJECT#{bucket}/{key}`, shared by every version of a key
//! - object row `SK = OBJECT#{version}`
//! - tombstone row `SK = TOMBSTONE#{version}`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object::ObjectReference;

/// Prefix of the partition key and of object row sort keys.
pub const OBJECT_PREFIX: &str = "OBJECT#";

/// Prefix of tombstone row sort keys.
pub const TOMBSTONE_PREFIX: &str = "TOMBSTONE#";

/// The record type a sort key disambiguates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// The object has been indexed.
    Object,
    /// The object's blob has been reclaimed.
    Tombstone,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Object => OBJECT_PREFIX,
            Self::Tombstone => TOMBSTONE_PREFIX,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "object"),
            Self::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// Two-part primary key of an index row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexKey {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
}

impl IndexKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Key of the object row for `reference`.
    pub fn for_object(reference: &ObjectReference) -> Self {
        Self::derive(reference, RecordKind::Object)
    }

    /// Key of the tombstone row for `reference`.
    pub fn for_tombstone(reference: &ObjectReference) -> Self {
        Self::derive(reference, RecordKind::Tombstone)
    }

    /// Derive the key of a row of the given kind.
    pub fn derive(reference: &ObjectReference, kind: RecordKind) -> Self {
        Self {
            pk: partition_key(&reference.bucket, &reference.key),
            sk: sort_key(&reference.version, kind),
        }
    }

    /// The record kind encoded in the sort key, if recognised.
    pub fn kind(&self) -> Option<RecordKind> {
        if self.sk.starts_with(TOMBSTONE_PREFIX) {
            Some(RecordKind::Tombstone)
        } else if self.sk.starts_with(OBJECT_PREFIX) {
            Some(RecordKind::Object)
        } else {
            None
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pk, self.sk)
    }
}

/// Partition key shared by every row of one `bucket/key`.
pub fn partition_key(bucket: &str, key: &str) -> String {
    format!("{OBJECT_PREFIX}{bucket}/{key}")
}

/// Sort key of a row of the given kind for one object version.
pub fn sort_key(version: &str, kind: RecordKind) -> String {
    format!("{}{version}", kind.prefix())
}
