//! In-memory backends for tests, demos and embedding.
//!
//! Both stores keep their data in `BTreeMap`s behind a `RwLock` and consult a
//! [`FaultInjector`] before every operation. Data is lost when the store is
//! dropped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use putdel_types::{IndexKey, IndexRecord, ObjectReference, VersionKind};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::fault::FaultInjector;
use crate::feed::{ChangeKind, ChangeRecord};
use crate::traits::{BlobStore, ConditionalKeyValueStore, ObjectMeta};
use crate::transaction::{CancellationReason, Condition, TransactItem};

fn poisoned<T>(err: PoisonError<T>) -> StoreError {
    StoreError::Unavailable(format!("lock poisoned: {err}"))
}

// ---------------------------------------------------------------------------
// Index store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct IndexState {
    rows: BTreeMap<IndexKey, IndexRecord>,
    changes: Vec<ChangeRecord>,
}

impl IndexState {
    /// Write a row and append its change record.
    fn apply(&mut self, record: IndexRecord) {
        let key = record.index_key();
        let old_image = self.rows.insert(key.clone(), record.clone());
        let kind = if old_image.is_some() {
            ChangeKind::Modify
        } else {
            ChangeKind::Insert
        };
        let sequence = self.changes.len() as u64 + 1;
        self.changes.push(ChangeRecord {
            sequence,
            kind,
            key,
            old_image,
            new_image: Some(record),
            recorded_at: Utc::now(),
        });
    }
}

/// An in-memory [`ConditionalKeyValueStore`].
///
/// The write lock is held across condition evaluation and mutation, which
/// gives transactions the same atomicity a real table provides.
#[derive(Debug)]
pub struct InMemoryIndexStore {
    table: String,
    state: RwLock<IndexState>,
    faults: FaultInjector,
}

impl InMemoryIndexStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: RwLock::new(IndexState::default()),
            faults: FaultInjector::new(),
        }
    }

    /// Failure switches for this store.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Number of rows in the table.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of change records ever appended.
    pub fn change_count(&self) -> usize {
        self.state.read().map(|s| s.changes.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConditionalKeyValueStore for InMemoryIndexStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    async fn get(&self, key: &IndexKey) -> StoreResult<Option<IndexRecord>> {
        self.faults.check("GetItem", &key.pk).await?;
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.rows.get(key).cloned())
    }

    async fn put(&self, record: &IndexRecord, condition: Condition) -> StoreResult<()> {
        self.faults.check("PutItem", &record.pk).await?;
        let key = record.index_key();
        let mut state = self.state.write().map_err(poisoned)?;
        if !condition.holds(state.rows.contains_key(&key)) {
            return Err(StoreError::ConditionFailed { key });
        }
        state.apply(record.clone());
        debug!(table = %self.table, key = %key, "put applied");
        Ok(())
    }

    async fn transact(&self, items: Vec<TransactItem>) -> StoreResult<()> {
        let partition = items.first().map(|i| i.key().pk).unwrap_or_default();
        self.faults.check("TransactWriteItems", &partition).await?;

        let mut state = self.state.write().map_err(poisoned)?;
        let reasons: Vec<CancellationReason> = items
            .iter()
            .map(|item| {
                if item.condition().holds(state.rows.contains_key(&item.key())) {
                    CancellationReason::None
                } else {
                    CancellationReason::ConditionalCheckFailed
                }
            })
            .collect();
        if reasons.iter().any(|r| r.is_condition_failure()) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        let mut applied = 0usize;
        for item in items {
            if let TransactItem::Put { record, .. } = item {
                state.apply(record);
                applied += 1;
            }
        }
        debug!(table = %self.table, applied, "transaction applied");
        Ok(())
    }

    async fn scan(&self) -> StoreResult<Vec<IndexRecord>> {
        self.faults.check("Scan", "").await?;
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.rows.values().cloned().collect())
    }

    async fn changes_since(&self, after: u64, limit: usize) -> StoreResult<Vec<ChangeRecord>> {
        self.faults.check("GetRecords", "").await?;
        let state = self.state.read().map_err(poisoned)?;
        // Sequence n lives at index n - 1.
        let start = usize::try_from(after).unwrap_or(usize::MAX);
        Ok(state
            .changes
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct StoredBlob {
    body: Bytes,
    version: String,
    last_modified: DateTime<Utc>,
}

/// Versions of one key, oldest first. The last one is current.
type Versions = Vec<StoredBlob>;

type Buckets = BTreeMap<String, BTreeMap<String, Versions>>;

/// An in-memory [`BlobStore`].
///
/// Every put assigns a fresh version string, so an overwrite at the same key
/// is observable as a version change. [`InMemoryBlobStore::new`] behaves like
/// an unversioned bucket: an overwrite replaces the stored bytes and
/// references carry an ETag. [`InMemoryBlobStore::versioned`] keeps every
/// version until it is deleted by version-id.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    buckets: RwLock<Buckets>,
    versioning: bool,
    next_version: AtomicU64,
    deletes: AtomicU64,
    faults: FaultInjector,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that retains noncurrent versions.
    pub fn versioned() -> Self {
        Self {
            versioning: true,
            ..Self::default()
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns `true` if any version of `bucket/key` is stored.
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .read()
            .map(|b| b.get(bucket).is_some_and(|objs| objs.contains_key(key)))
            .unwrap_or(false)
    }

    /// Returns `true` if the exact version named by `reference` is stored.
    pub fn holds(&self, reference: &ObjectReference) -> bool {
        self.buckets
            .read()
            .map(|b| {
                b.get(&reference.bucket)
                    .and_then(|objs| objs.get(&reference.key))
                    .is_some_and(|versions| {
                        versions.iter().any(|blob| blob.version == reference.version)
                    })
            })
            .unwrap_or(false)
    }

    /// Current body of `bucket/key`.
    pub fn body(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().ok()?;
        buckets
            .get(bucket)?
            .get(key)?
            .last()
            .map(|blob| blob.body.clone())
    }

    /// Total number of stored versions across buckets.
    pub fn object_count(&self) -> usize {
        self.buckets
            .read()
            .map(|b| b.values().flat_map(BTreeMap::values).map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of deletes that actually removed a version.
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    fn reference(&self, bucket: &str, key: &str, version: &str) -> ObjectReference {
        let kind = if self.versioning {
            VersionKind::VersionId
        } else {
            VersionKind::ETag
        };
        ObjectReference::with_kind(bucket, key, version, kind)
    }

    fn meta(&self, bucket: &str, key: &str, blob: &StoredBlob) -> ObjectMeta {
        ObjectMeta {
            reference: self.reference(bucket, key, &blob.version),
            size: blob.body.len() as u64,
            last_modified: blob.last_modified,
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> StoreResult<ObjectReference> {
        self.faults.check("PutObject", &format!("{bucket}/{key}")).await?;
        let seq = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let version = format!("{seq:016x}");
        let blob = StoredBlob {
            body,
            version: version.clone(),
            last_modified: Utc::now(),
        };
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let versions = buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        if !self.versioning {
            versions.clear();
        }
        versions.push(blob);
        Ok(self.reference(bucket, key, &version))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.faults.check("HeadObject", &format!("{bucket}/{key}")).await?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets
            .get(bucket)
            .and_then(|objs| objs.get(key))
            .and_then(|versions| versions.last())
            .map(|blob| self.meta(bucket, key, blob)))
    }

    async fn delete_object(&self, reference: &ObjectReference) -> StoreResult<()> {
        let ObjectReference {
            bucket,
            key,
            version,
            version_kind,
        } = reference;
        self.faults.check("DeleteObject", &format!("{bucket}/{key}")).await?;

        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let not_found = || StoreError::ObjectNotFound {
            bucket: bucket.clone(),
            key: key.clone(),
        };
        let objects = buckets.get_mut(bucket).ok_or_else(not_found)?;
        let versions = objects.get_mut(key).ok_or_else(not_found)?;
        let position = match version_kind {
            VersionKind::VersionId => versions
                .iter()
                .position(|blob| blob.version == *version)
                .ok_or_else(not_found)?,
            VersionKind::ETag => {
                let current = versions.len().checked_sub(1).ok_or_else(not_found)?;
                if versions[current].version != *version {
                    return Err(StoreError::VersionMismatch {
                        bucket: bucket.clone(),
                        key: key.clone(),
                        expected: version.clone(),
                        actual: versions[current].version.clone(),
                    });
                }
                current
            }
        };
        versions.remove(position);
        if versions.is_empty() {
            objects.remove(key);
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.faults.check("ListObjectsV2", bucket).await?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets
            .get(bucket)
            .map(|objs| {
                objs.iter()
                    .filter_map(|(key, versions)| {
                        versions.last().map(|blob| self.meta(bucket, key, blob))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_object_versions(&self, bucket: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.faults.check("ListObjectVersions", bucket).await?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets
            .get(bucket)
            .map(|objs| {
                objs.iter()
                    .flat_map(|(key, versions)| {
                        versions.iter().map(move |blob| self.meta(bucket, key, blob))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
