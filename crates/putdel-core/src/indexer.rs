//! The indexer: turns "Object Created" notifications into index rows.
//!
//! Each notification becomes one all-or-nothing transaction:
//!
//! 1. ConditionCheck: the object's tombstone row is absent.
//! 2. Put: the object row, only if absent.
//!
//! A redelivered notification fails one of the two conditions and completes
//! as a no-op. Nothing is overwritten, and no second change record is
//! produced, so the deleter is never triggered twice by the indexer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use putdel_store::{CancellationReason, Condition, ConditionalKeyValueStore, StoreError, TransactItem};
use putdel_types::{DispatchRule, IndexKey, IndexRecord, ObjectCreatedEvent, ObjectReference};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::{bounded, report_failure};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

const TOMBSTONE_ITEM: usize = 0;
const OBJECT_ITEM: usize = 1;

/// What the indexer did with one notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IndexOutcome {
    /// The row was written; the change feed will carry it to the deleter.
    Indexed {
        key: IndexKey,
        reference: ObjectReference,
    },
    /// The row already existed. Nothing was written.
    AlreadyIndexed {
        key: IndexKey,
        reference: ObjectReference,
    },
    /// The object was already reclaimed. Nothing was written.
    AlreadyReclaimed {
        key: IndexKey,
        reference: ObjectReference,
    },
    /// The dispatch rule would not have routed this event here.
    Ignored { reason: String },
}

impl IndexOutcome {
    pub fn reference(&self) -> Option<&ObjectReference> {
        match self {
            Self::Indexed { reference, .. }
            | Self::AlreadyIndexed { reference, .. }
            | Self::AlreadyReclaimed { reference, .. } => Some(reference),
            Self::Ignored { .. } => None,
        }
    }

    /// Returns `true` only when this call created the row.
    pub fn wrote_row(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }
}

impl fmt::Display for IndexOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed { reference, .. } => write!(f, "indexed {reference}"),
            Self::AlreadyIndexed { reference, .. } => write!(f, "already indexed {reference}"),
            Self::AlreadyReclaimed { reference, .. } => {
                write!(f, "already reclaimed {reference}")
            }
            Self::Ignored { reason } => write!(f, "ignored: {reason}"),
        }
    }
}

/// Stateless indexing unit. Cheap to clone; clones share the store handle.
#[derive(Clone)]
pub struct Indexer {
    index: Arc<dyn ConditionalKeyValueStore>,
    rule: DispatchRule,
    timeout: Duration,
}

impl Indexer {
    pub fn new(index: Arc<dyn ConditionalKeyValueStore>, config: &PipelineConfig) -> Self {
        Self {
            index,
            rule: config.dispatch_rule(),
            timeout: config.store_timeout,
        }
    }

    /// Decode a raw notification and index it.
    pub async fn handle_payload(&self, payload: &[u8]) -> PipelineResult<IndexOutcome> {
        let event = match ObjectCreatedEvent::from_json(payload) {
            Ok(event) => event,
            Err(err) => {
                let err = PipelineError::from(err);
                report_failure("indexer", "<undecodable>", &err);
                return Err(err);
            }
        };
        self.handle(&event).await
    }

    /// Index one decoded notification.
    pub async fn handle(&self, event: &ObjectCreatedEvent) -> PipelineResult<IndexOutcome> {
        if !self.rule.matches(event) {
            let reason = format!(
                "{} event from {} for bucket {:?}",
                event.detail_type,
                event.source,
                event.bucket()
            );
            debug!(event_id = %event.id, %reason, "event not routed to indexer");
            return Ok(IndexOutcome::Ignored { reason });
        }

        let reference = match event.object_reference() {
            Ok(reference) => reference,
            Err(err) => {
                let err = PipelineError::from(err);
                report_failure("indexer", &event.id, &err);
                return Err(err);
            }
        };

        let subject = reference.to_string();
        self.commit(event, reference).await.inspect_err(|err| {
            report_failure("indexer", &subject, err);
        })
    }

    async fn commit(
        &self,
        event: &ObjectCreatedEvent,
        reference: ObjectReference,
    ) -> PipelineResult<IndexOutcome> {
        let object = &event.detail.object;
        let record = IndexRecord::object(&reference, object.size, object.sequencer.clone(), Utc::now());
        let key = record.index_key();
        let items = vec![
            TransactItem::ConditionCheck {
                key: reference.tombstone_key(),
                condition: Condition::IfAbsent,
            },
            TransactItem::Put {
                record,
                condition: Condition::IfAbsent,
            },
        ];

        let result = bounded(
            "TransactWriteItems",
            self.timeout,
            self.index.transact(items),
        )
        .await;

        match result {
            Ok(()) => {
                info!(
                    table = self.index.table_name(),
                    event_id = %event.id,
                    pk = %key.pk,
                    sk = %key.sk,
                    "object indexed"
                );
                Ok(IndexOutcome::Indexed { key, reference })
            }
            Err(PipelineError::Store(StoreError::TransactionCanceled { reasons })) => {
                let failed = |item: usize| {
                    reasons
                        .get(item)
                        .is_some_and(CancellationReason::is_condition_failure)
                };
                if failed(TOMBSTONE_ITEM) {
                    debug!(%reference, "tombstone present, skipping");
                    Ok(IndexOutcome::AlreadyReclaimed { key, reference })
                } else if failed(OBJECT_ITEM) {
                    debug!(%reference, "index row present, skipping");
                    Ok(IndexOutcome::AlreadyIndexed { key, reference })
                } else {
                    Err(StoreError::TransactionCanceled { reasons }.into())
                }
            }
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("table", &self.index.table_name())
            .field("rule", &self.rule)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use putdel_store::InMemoryIndexStore;

    fn setup() -> (Arc<InMemoryIndexStore>, Indexer) {
        let store = Arc::new(InMemoryIndexStore::new("files"));
        let config = PipelineConfig::new("files").with_store_timeout(Duration::from_millis(200));
        let indexer = Indexer::new(store.clone(), &config);
        (store, indexer)
    }

    fn event(key: &str, version: &str) -> ObjectCreatedEvent {
        ObjectCreatedEvent::synthetic(&ObjectReference::new("b", key, version), 11)
    }

    #[tokio::test]
    async fn single_delivery_writes_one_row() {
        let (store, indexer) = setup();
        let outcome = indexer.handle(&event("f1", "v1")).await.unwrap();

        assert!(outcome.wrote_row());
        let key = ObjectReference::new("b", "f1", "v1").index_key();
        let row = store.get(&key).await.unwrap().expect("row");
        assert_eq!(row.size, 11);
        assert_eq!(store.len(), 1);
        assert_eq!(store.change_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_noop() {
        let (store, indexer) = setup();
        let e = event("f1", "v1");
        indexer.handle(&e).await.unwrap();
        let before = store.get(&ObjectReference::new("b", "f1", "v1").index_key()).await.unwrap();

        let second = indexer.handle(&e).await.unwrap();
        assert!(matches!(second, IndexOutcome::AlreadyIndexed { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.change_count(), 1);
        let after = store.get(&ObjectReference::new("b", "f1", "v1").index_key()).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn redelivery_after_reclaim_is_noop() {
        let (store, indexer) = setup();
        let r = ObjectReference::new("b", "f1", "v1");
        store
            .put(&IndexRecord::tombstone(&r, Utc::now()), Condition::IfAbsent)
            .await
            .unwrap();

        let outcome = indexer.handle(&event("f1", "v1")).await.unwrap();
        assert!(matches!(outcome, IndexOutcome::AlreadyReclaimed { .. }));
        assert!(store.get(&r.index_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_version_of_reclaimed_key_is_indexed() {
        let (store, indexer) = setup();
        let v1 = ObjectReference::new("b", "f1", "v1");
        store
            .put(&IndexRecord::tombstone(&v1, Utc::now()), Condition::IfAbsent)
            .await
            .unwrap();

        let outcome = indexer.handle(&event("f1", "v2")).await.unwrap();
        assert!(outcome.wrote_row());
    }

    #[tokio::test]
    async fn other_event_types_are_ignored() {
        let (store, indexer) = setup();
        let mut e = event("f1", "v1");
        e.detail_type = "Object Deleted".into();
        let outcome = indexer.handle(&e).await.unwrap();
        assert!(matches!(outcome, IndexOutcome::Ignored { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn other_buckets_are_ignored_when_scoped() {
        let store = Arc::new(InMemoryIndexStore::new("files"));
        let indexer = Indexer::new(store.clone(), &PipelineConfig::new("files").with_bucket("landing"));
        let outcome = indexer.handle(&event("f1", "v1")).await.unwrap();
        assert!(matches!(outcome, IndexOutcome::Ignored { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_permanent() {
        let (store, indexer) = setup();
        let err = indexer.handle_payload(b"{\"detail\":").await.unwrap_err();
        assert!(matches!(err, PipelineError::Event(_)));
        assert!(!err.is_retriable());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_key_is_permanent() {
        let (store, indexer) = setup();
        let mut e = event("f1", "v1");
        e.detail.object.key.clear();
        let err = indexer.handle(&e).await.unwrap_err();
        assert!(matches!(err, PipelineError::Event(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_is_transient_then_recovers() {
        let (store, indexer) = setup();
        let e = event("f1", "v1");
        store.faults().set_unavailable(true);
        let err = indexer.handle(&e).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(store.is_empty());

        store.faults().set_unavailable(false);
        assert!(indexer.handle(&e).await.unwrap().wrote_row());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let (store, indexer) = setup();
        store.faults().set_latency(Duration::from_secs(2));
        let err = indexer.handle(&event("f1", "v1")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn payload_round_trip() {
        let (_, indexer) = setup();
        let payload = serde_json::to_vec(&event("f1", "v1")).unwrap();
        assert!(indexer.handle_payload(&payload).await.unwrap().wrote_row());
    }
}
