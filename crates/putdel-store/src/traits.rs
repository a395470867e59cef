use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use putdel_types::{IndexKey, IndexRecord, ObjectReference};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::feed::ChangeRecord;
use crate::transaction::{Condition, TransactItem};

/// The index table: a durable `(PK, SK)`-keyed store.
///
/// All implementations must satisfy these invariants:
/// - `put` and `transact` evaluate their conditions atomically with the
///   write. A failed condition writes nothing.
/// - `transact` is all-or-nothing. On cancellation it returns
///   `StoreError::TransactionCanceled` with one reason per item.
/// - Every applied mutation appends exactly one change record, after the
///   write is durable.
#[async_trait]
pub trait ConditionalKeyValueStore: Send + Sync {
    /// Name of the table this handle writes to.
    fn table_name(&self) -> &str;

    /// Read a row. Returns `Ok(None)` if it does not exist.
    async fn get(&self, key: &IndexKey) -> StoreResult<Option<IndexRecord>>;

    /// Write one row if `condition` holds.
    ///
    /// Returns `StoreError::ConditionFailed` when it does not.
    async fn put(&self, record: &IndexRecord, condition: Condition) -> StoreResult<()>;

    /// Apply every item or none of them.
    async fn transact(&self, items: Vec<TransactItem>) -> StoreResult<()>;

    /// Every row in the table, ordered by key.
    async fn scan(&self) -> StoreResult<Vec<IndexRecord>>;

    /// Change records with a sequence greater than `after`, oldest first,
    /// at most `limit` of them.
    async fn changes_since(&self, after: u64, limit: usize) -> StoreResult<Vec<ChangeRecord>>;
}

/// Metadata about a stored blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub reference: ObjectReference,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// The landing-zone object store.
///
/// A store either keeps every version of a key (a versioned bucket, whose
/// references carry a version-id) or only the latest write (references carry
/// the ETag).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return the reference of the version just written.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes)
        -> StoreResult<ObjectReference>;

    /// Current metadata for `bucket/key`, or `Ok(None)` if absent.
    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Delete exactly the version named by `reference`, never another one.
    ///
    /// A version-id reference removes that version whether or not it is
    /// current, and returns `StoreError::ObjectNotFound` if it no longer
    /// exists. An ETag reference removes the current object only if its
    /// ETag matches, returning `StoreError::VersionMismatch` when a
    /// different write is current and `StoreError::ObjectNotFound` when the
    /// key is empty.
    async fn delete_object(&self, reference: &ObjectReference) -> StoreResult<()>;

    /// The current object of every key in `bucket`, ordered by key.
    async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<ObjectMeta>>;

    /// Every stored version in `bucket`, noncurrent ones included, ordered
    /// by key and then oldest first.
    async fn list_object_versions(&self, bucket: &str) -> StoreResult<Vec<ObjectMeta>>;
}
