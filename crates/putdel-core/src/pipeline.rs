//! End-to-end wiring of indexer, change feed and deleter.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use putdel_store::{BlobStore, ConditionalKeyValueStore};
use putdel_types::{ObjectReference, ObjectState, Transition, TypeError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::classify::FailureClass;
use crate::config::PipelineConfig;
use crate::deleter::{DeleteOutcome, Deleter};
use crate::dispatch::run_isolated;
use crate::error::PipelineResult;
use crate::feed::{FeedBatch, FeedConsumer};
use crate::indexer::{IndexOutcome, Indexer};

/// A transition the lifecycle state machine refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub reference: ObjectReference,
    pub error: TypeError,
}

/// Observed lifecycle of every object this process has touched.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    states: BTreeMap<ObjectReference, ObjectState>,
    violations: Vec<Violation>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `reference`. Unknown references are unindexed.
    pub fn state(&self, reference: &ObjectReference) -> ObjectState {
        self.states
            .get(reference)
            .copied()
            .unwrap_or(ObjectState::Unindexed)
    }

    /// Seed the state of a reference first seen mid-lifecycle.
    ///
    /// Has no effect if the reference is already known.
    pub fn observe(&mut self, reference: &ObjectReference, state: ObjectState) {
        self.states.entry(reference.clone()).or_insert(state);
    }

    /// Apply `transition`; a refused transition is recorded and the state kept.
    pub fn apply(&mut self, reference: &ObjectReference, transition: Transition) -> ObjectState {
        let current = self.state(reference);
        match current.advance(transition) {
            Ok(next) => {
                self.states.insert(reference.clone(), next);
                next
            }
            Err(err) => {
                error!(%reference, error = %err, "lifecycle violation");
                self.violations.push(Violation {
                    reference: reference.clone(),
                    error: err,
                });
                current
            }
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Number of known references in `state`.
    pub fn count(&self, state: ObjectState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectReference, ObjectState)> {
        self.states.iter().map(|(r, s)| (r, *s))
    }

    fn record_index(&mut self, outcome: &IndexOutcome) {
        match outcome {
            IndexOutcome::Indexed { reference, .. } | IndexOutcome::AlreadyIndexed { reference, .. } => {
                self.apply(reference, Transition::BeginIndexing);
                self.apply(reference, Transition::IndexCommitted);
            }
            IndexOutcome::AlreadyReclaimed { reference, .. } => {
                self.observe(reference, ObjectState::Deleted);
                self.apply(reference, Transition::BeginIndexing);
            }
            IndexOutcome::Ignored { .. } => {}
        }
    }

    fn record_deletion(&mut self, reference: &ObjectReference, result: &PipelineResult<DeleteOutcome>) {
        // A change feed insert proves the row was committed.
        self.observe(reference, ObjectState::Indexed);
        self.apply(reference, Transition::BeginDeletion);
        let end = match result {
            Ok(_) => Transition::DeletionCompleted,
            Err(_) => Transition::DeletionFailed,
        };
        self.apply(reference, end);
    }
}

/// Counts over a set of indexing results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub indexed: usize,
    pub already_indexed: usize,
    pub already_reclaimed: usize,
    pub ignored: usize,
    pub transient_failures: usize,
    pub permanent_failures: usize,
}

impl IngestSummary {
    pub fn from_results(results: &[PipelineResult<IndexOutcome>]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result {
                Ok(IndexOutcome::Indexed { .. }) => summary.indexed += 1,
                Ok(IndexOutcome::AlreadyIndexed { .. }) => summary.already_indexed += 1,
                Ok(IndexOutcome::AlreadyReclaimed { .. }) => summary.already_reclaimed += 1,
                Ok(IndexOutcome::Ignored { .. }) => summary.ignored += 1,
                Err(err) if err.class() == FailureClass::Transient => summary.transient_failures += 1,
                Err(_) => summary.permanent_failures += 1,
            }
        }
        summary
    }

    pub fn failures(&self) -> usize {
        self.transient_failures + self.permanent_failures
    }
}

/// Counts over one drain of the change feed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimSummary {
    pub checkpoint: u64,
    pub signals: usize,
    pub deleted: usize,
    pub already_gone: usize,
    pub superseded: usize,
    pub failures: usize,
}

impl ReclaimSummary {
    fn add(&mut self, batch: &FeedBatch) {
        self.checkpoint = batch.checkpoint;
        self.signals += batch.signals.len();
        for result in &batch.results {
            match result {
                Ok(DeleteOutcome::Deleted { .. }) => self.deleted += 1,
                Ok(DeleteOutcome::AlreadyGone { .. }) => self.already_gone += 1,
                Ok(DeleteOutcome::Superseded { .. }) => self.superseded += 1,
                Err(_) => self.failures += 1,
            }
        }
    }
}

/// Indexer, deleter and feed consumer over one pair of stores.
#[derive(Debug)]
pub struct Pipeline {
    indexer: Indexer,
    deleter: Deleter,
    feed: FeedConsumer,
    journal: Journal,
}

impl Pipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn ConditionalKeyValueStore>,
        config: &PipelineConfig,
    ) -> Self {
        let indexer = Indexer::new(index.clone(), config);
        let deleter = Deleter::new(blobs, index.clone(), config);
        let feed = FeedConsumer::new(index, deleter.clone(), config);
        Self {
            indexer,
            deleter,
            feed,
            journal: Journal::new(),
        }
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn deleter(&self) -> &Deleter {
        &self.deleter
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Change feed position reclaimed so far.
    pub fn checkpoint(&self) -> u64 {
        self.feed.checkpoint()
    }

    /// Index every payload concurrently. Results are in payload order.
    pub async fn ingest(&mut self, payloads: Vec<Bytes>) -> Vec<PipelineResult<IndexOutcome>> {
        let indexer = self.indexer.clone();
        let results = run_isolated(payloads, move |payload| {
            let indexer = indexer.clone();
            async move { indexer.handle_payload(&payload).await }
        })
        .await;

        for outcome in results.iter().flatten() {
            self.journal.record_index(outcome);
        }
        let summary = IngestSummary::from_results(&results);
        info!(
            indexed = summary.indexed,
            duplicates = summary.already_indexed + summary.already_reclaimed,
            ignored = summary.ignored,
            failures = summary.failures(),
            "ingest finished"
        );
        results
    }

    /// Drain the change feed, reclaiming every newly committed object.
    ///
    /// A feed read failure is returned after the batches consumed before it
    /// have been recorded in the journal.
    pub async fn reclaim(&mut self) -> PipelineResult<ReclaimSummary> {
        let mut batches = Vec::new();
        let drained = self.feed.drain_into(&mut batches).await;
        let mut summary = ReclaimSummary {
            checkpoint: self.feed.checkpoint(),
            ..ReclaimSummary::default()
        };
        for batch in &batches {
            summary.add(batch);
            for (signal, result) in batch.signals.iter().zip(&batch.results) {
                self.journal.record_deletion(&signal.reference, result);
            }
        }
        drained.map(|()| summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use putdel_store::{
        ChangeRecord, Condition, InMemoryBlobStore, InMemoryIndexStore, StoreError, StoreResult,
        TransactItem,
    };
    use putdel_types::{CommitSignal, IndexKey, IndexRecord, ObjectCreatedEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        blobs: Arc<InMemoryBlobStore>,
        index: Arc<InMemoryIndexStore>,
        pipeline: Pipeline,
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new("files").with_store_timeout(Duration::from_millis(500))
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(InMemoryIndexStore::new("files"));
        let pipeline = Pipeline::new(blobs.clone(), index.clone(), &config());
        Fixture {
            blobs,
            index,
            pipeline,
        }
    }

    fn payload(reference: &ObjectReference) -> Bytes {
        let event = ObjectCreatedEvent::synthetic(reference, 1);
        Bytes::from(serde_json::to_vec(&event).unwrap())
    }

    async fn upload(f: &Fixture, key: &str, body: &'static [u8]) -> ObjectReference {
        f.blobs
            .put_object("b", key, Bytes::from_static(body))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn scenario_single_delivery_indexes_without_deleting() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;

        let results = f.pipeline.ingest(vec![payload(&r)]).await;
        assert!(results[0].as_ref().unwrap().wrote_row());

        let row = f.index.get(&r.index_key()).await.unwrap().expect("row");
        assert_eq!(row.index_key().pk, "OBJECT#b/f1");
        assert_eq!(f.index.len(), 1);
        assert!(f.blobs.contains("b", "f1"));
        assert_eq!(f.pipeline.journal().state(&r), ObjectState::Indexed);
    }

    #[tokio::test]
    async fn scenario_duplicate_delivery_is_noop() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;

        f.pipeline.ingest(vec![payload(&r)]).await;
        let second = f.pipeline.ingest(vec![payload(&r)]).await;
        assert!(matches!(second[0], Ok(IndexOutcome::AlreadyIndexed { .. })));
        assert_eq!(f.index.len(), 1);
        assert_eq!(f.index.change_count(), 1);
    }

    #[tokio::test]
    async fn scenario_commit_signal_deletes_then_redelivery_is_noop() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;
        f.pipeline.ingest(vec![payload(&r)]).await;

        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(!f.blobs.contains("b", "f1"));
        assert_eq!(f.pipeline.journal().state(&r), ObjectState::Deleted);

        let signal = CommitSignal {
            sequence: 1,
            key: r.index_key(),
            reference: r.clone(),
        };
        let again = f.pipeline.deleter().handle(&signal).await.unwrap();
        assert!(matches!(again, DeleteOutcome::AlreadyGone { .. }));
        assert_eq!(f.blobs.delete_count(), 1);
    }

    #[tokio::test]
    async fn scenario_unavailable_index_then_retry() {
        let mut f = fixture();
        let a = upload(&f, "a", b"a").await;
        let b = upload(&f, "b", b"b").await;

        f.index.faults().fail_next(1);
        let first = f.pipeline.ingest(vec![payload(&a)]).await;
        assert!(first[0].as_ref().unwrap_err().is_retriable());
        assert_eq!(f.pipeline.journal().state(&a), ObjectState::Unindexed);

        let retry = f.pipeline.ingest(vec![payload(&a), payload(&b)]).await;
        assert!(retry.iter().all(|r| r.as_ref().is_ok_and(IndexOutcome::wrote_row)));
        assert_eq!(f.index.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_duplicates_produce_one_row() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;

        let results = f.pipeline.ingest(vec![payload(&r); 16]).await;
        let summary = IngestSummary::from_results(&results);
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.already_indexed, 15);
        assert_eq!(f.index.len(), 1);
        assert_eq!(f.index.change_count(), 1);

        let reclaimed = f.pipeline.reclaim().await.unwrap();
        assert_eq!(reclaimed.signals, 1);
    }

    #[tokio::test]
    async fn malformed_event_does_not_affect_neighbours() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;

        let results = f
            .pipeline
            .ingest(vec![Bytes::from_static(b"not json"), payload(&r)])
            .await;
        assert!(results[0].is_err());
        assert!(results[1].as_ref().unwrap().wrote_row());
        let summary = IngestSummary::from_results(&results);
        assert_eq!(summary.permanent_failures, 1);
    }

    #[tokio::test]
    async fn nothing_is_deleted_without_a_committed_row() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;

        f.index.faults().set_unavailable(true);
        assert!(f.pipeline.ingest(vec![payload(&r)]).await[0].is_err());
        assert!(f.pipeline.reclaim().await.is_err());
        f.index.faults().set_unavailable(false);

        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.signals, 0);
        assert!(f.blobs.contains("b", "f1"));
        assert!(f.pipeline.journal().violations().is_empty());
    }

    #[tokio::test]
    async fn crash_after_commit_is_recovered_from_feed() {
        let f = fixture();
        let r = upload(&f, "f1", b"one").await;

        // Commit through a bare indexer, then "crash" before any deleter runs.
        let indexer = Indexer::new(f.index.clone(), &config());
        indexer
            .handle(&ObjectCreatedEvent::synthetic(&r, 3))
            .await
            .unwrap();
        drop(indexer);

        let mut restarted = Pipeline::new(f.blobs.clone(), f.index.clone(), &config());
        let summary = restarted.reclaim().await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(!f.blobs.contains("b", "f1"));
        assert_eq!(restarted.journal().state(&r), ObjectState::Deleted);
    }

    #[tokio::test]
    async fn overwrite_before_reclaim_keeps_newer_version() {
        let mut f = fixture();
        let v1 = upload(&f, "f1", b"one").await;
        f.pipeline.ingest(vec![payload(&v1)]).await;
        let v2 = upload(&f, "f1", b"two").await;

        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.superseded, 1);
        assert_eq!(f.blobs.body("b", "f1").unwrap(), Bytes::from_static(b"two"));

        f.pipeline.ingest(vec![payload(&v2)]).await;
        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(!f.blobs.contains("b", "f1"));
        assert!(f.pipeline.journal().violations().is_empty());
    }

    #[tokio::test]
    async fn redelivery_after_reclaim_stays_deleted() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;
        f.pipeline.ingest(vec![payload(&r)]).await;
        f.pipeline.reclaim().await.unwrap();

        let late = f.pipeline.ingest(vec![payload(&r)]).await;
        assert!(matches!(late[0], Ok(IndexOutcome::AlreadyReclaimed { .. })));
        assert_eq!(f.pipeline.journal().state(&r), ObjectState::Deleted);
        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.signals, 0);
    }

    #[tokio::test]
    async fn failed_deletion_returns_to_indexed() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;
        f.pipeline.ingest(vec![payload(&r)]).await;
        f.blobs.faults().deny_key("b/f1");

        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(f.pipeline.journal().state(&r), ObjectState::Indexed);
        assert!(f.blobs.contains("b", "f1"));
    }

    #[test]
    fn journal_records_premature_deletion() {
        let mut journal = Journal::new();
        let r = ObjectReference::new("b", "f1", "v1");
        journal.apply(&r, Transition::BeginIndexing);
        let state = journal.apply(&r, Transition::BeginDeletion);
        assert_eq!(state, ObjectState::IndexingInFlight);
        assert_eq!(journal.violations().len(), 1);
        assert_eq!(journal.violations()[0].reference, r);
    }

    #[test]
    fn journal_observe_does_not_overwrite() {
        let mut journal = Journal::new();
        let r = ObjectReference::new("b", "f1", "v1");
        journal.observe(&r, ObjectState::Deleted);
        journal.observe(&r, ObjectState::Indexed);
        assert_eq!(journal.state(&r), ObjectState::Deleted);
        assert_eq!(journal.count(ObjectState::Deleted), 1);
    }

    #[tokio::test]
    async fn tombstone_present_before_index_is_reclaimed_outcome() {
        let mut f = fixture();
        let r = upload(&f, "f1", b"one").await;
        f.index
            .put(&IndexRecord::tombstone(&r, chrono::Utc::now()), Condition::IfAbsent)
            .await
            .unwrap();
        let results = f.pipeline.ingest(vec![payload(&r)]).await;
        assert!(matches!(results[0], Ok(IndexOutcome::AlreadyReclaimed { .. })));
        assert!(f.pipeline.journal().violations().is_empty());
    }

    #[tokio::test]
    async fn versionless_notification_is_rejected_and_newer_write_survives() {
        let mut f = fixture();
        let v1 = upload(&f, "f1", b"one").await;
        let mut event = ObjectCreatedEvent::synthetic(&v1, 3);
        event.detail.object.etag.clear();
        let raw = Bytes::from(serde_json::to_vec(&event).unwrap());

        let results = f.pipeline.ingest(vec![raw]).await;
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Event(TypeError::InvalidReference { field: "version", .. })
        ));
        assert!(!err.is_retriable());
        assert!(f.index.is_empty());

        let v2 = upload(&f, "f1", b"two").await;
        let summary = f.pipeline.reclaim().await.unwrap();
        assert_eq!(summary.signals, 0);
        assert!(f.blobs.holds(&v2));
        assert_eq!(f.blobs.delete_count(), 0);
    }

    #[tokio::test]
    async fn versioned_overwrite_reclaims_the_noncurrent_version() {
        let blobs = Arc::new(InMemoryBlobStore::versioned());
        let index = Arc::new(InMemoryIndexStore::new("files"));
        let mut pipeline = Pipeline::new(blobs.clone(), index.clone(), &config());

        let v1 = blobs.put_object("b", "f1", Bytes::from_static(b"one")).await.unwrap();
        pipeline.ingest(vec![payload(&v1)]).await;
        let v2 = blobs.put_object("b", "f1", Bytes::from_static(b"two")).await.unwrap();

        let summary = pipeline.reclaim().await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.superseded, 0);
        assert!(!blobs.holds(&v1));
        assert!(blobs.holds(&v2));
        assert_eq!(blobs.body("b", "f1").unwrap(), Bytes::from_static(b"two"));
        assert!(index.get(&v2.index_key()).await.unwrap().is_none());

        pipeline.ingest(vec![payload(&v2)]).await;
        let summary = pipeline.reclaim().await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(blobs.object_count(), 0);
        assert!(pipeline.journal().violations().is_empty());
    }

    /// Index store whose change feed stops answering after `healthy_reads`.
    struct ClosingFeed {
        inner: InMemoryIndexStore,
        reads: AtomicUsize,
        healthy_reads: usize,
    }

    #[async_trait]
    impl ConditionalKeyValueStore for ClosingFeed {
        fn table_name(&self) -> &str {
            self.inner.table_name()
        }

        async fn get(&self, key: &IndexKey) -> StoreResult<Option<IndexRecord>> {
            self.inner.get(key).await
        }

        async fn put(&self, record: &IndexRecord, condition: Condition) -> StoreResult<()> {
            self.inner.put(record, condition).await
        }

        async fn transact(&self, items: Vec<TransactItem>) -> StoreResult<()> {
            self.inner.transact(items).await
        }

        async fn scan(&self) -> StoreResult<Vec<IndexRecord>> {
            self.inner.scan().await
        }

        async fn changes_since(&self, after: u64, limit: usize) -> StoreResult<Vec<ChangeRecord>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) >= self.healthy_reads {
                return Err(StoreError::Unavailable("shard closed".into()));
            }
            self.inner.changes_since(after, limit).await
        }
    }

    #[tokio::test]
    async fn feed_failure_mid_drain_keeps_journal_at_checkpoint() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let index = Arc::new(ClosingFeed {
            inner: InMemoryIndexStore::new("files"),
            reads: AtomicUsize::new(0),
            healthy_reads: 1,
        });
        let mut config = config();
        config.feed_batch_size = 1;
        let mut pipeline = Pipeline::new(blobs.clone(), index.clone(), &config);

        let first = blobs.put_object("b", "a", Bytes::from_static(b"a")).await.unwrap();
        let second = blobs.put_object("b", "z", Bytes::from_static(b"z")).await.unwrap();
        pipeline.ingest(vec![payload(&first)]).await;
        pipeline.ingest(vec![payload(&second)]).await;

        let err = pipeline.reclaim().await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(pipeline.checkpoint(), 1);
        assert!(!blobs.contains("b", "a"));
        assert_eq!(pipeline.journal().state(&first), ObjectState::Deleted);
        assert_eq!(pipeline.journal().state(&second), ObjectState::Indexed);
        assert!(blobs.contains("b", "z"));
    }
}
