//! Read-only comparison of blob store contents against the index.
//!
//! The sweep never writes. [`Reconciler::redrive`] feeds what it found back
//! through the ordinary indexer and deleter, which are idempotent, so a
//! re-drive of an already-consistent object does nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use putdel_store::{BlobStore, ConditionalKeyValueStore};
use putdel_types::{CommitSignal, ObjectCreatedEvent, ObjectReference, ObjectState, RecordKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::bounded;
use crate::config::PipelineConfig;
use crate::deleter::{DeleteOutcome, Deleter};
use crate::dispatch::run_isolated;
use crate::error::PipelineResult;
use crate::indexer::{IndexOutcome, Indexer};

/// What the sweep concluded about one object version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum Finding {
    /// Blob present with no index row: the notification was lost or failed.
    Orphaned { reference: ObjectReference, size: u64 },
    /// Row committed and blob still present: the deletion never ran or failed.
    AwaitingDeletion { reference: ObjectReference },
    /// Row committed, blob gone, but no tombstone recorded.
    MissingTombstone { reference: ObjectReference },
    /// Tombstone recorded yet the same version is stored again.
    Reappeared { reference: ObjectReference },
    /// Tombstone recorded and the blob is gone.
    Reclaimed { reference: ObjectReference },
}

impl Finding {
    pub fn reference(&self) -> &ObjectReference {
        match self {
            Self::Orphaned { reference, .. }
            | Self::AwaitingDeletion { reference }
            | Self::MissingTombstone { reference }
            | Self::Reappeared { reference }
            | Self::Reclaimed { reference } => reference,
        }
    }

    /// Lifecycle state the observed store contents correspond to.
    pub fn state(&self) -> ObjectState {
        match self {
            Self::Orphaned { .. } => ObjectState::Unindexed,
            Self::AwaitingDeletion { .. } => ObjectState::Indexed,
            Self::MissingTombstone { .. } | Self::Reappeared { .. } | Self::Reclaimed { .. } => {
                ObjectState::Deleted
            }
        }
    }

    /// Returns `true` if a re-drive would change store contents.
    pub fn needs_redrive(&self) -> bool {
        !matches!(self, Self::Reclaimed { .. })
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Orphaned { .. } => "orphaned",
            Self::AwaitingDeletion { .. } => "awaiting deletion",
            Self::MissingTombstone { .. } => "missing tombstone",
            Self::Reappeared { .. } => "reappeared",
            Self::Reclaimed { .. } => "reclaimed",
        };
        write!(f, "{label} {}", self.reference())
    }
}

/// Result of one sweep over a bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub bucket: String,
    pub findings: Vec<Finding>,
}

impl SweepReport {
    /// Findings a re-drive would act on.
    pub fn pending(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.needs_redrive())
    }

    pub fn is_consistent(&self) -> bool {
        self.pending().next().is_none()
    }

    /// Number of findings in `state`.
    pub fn count(&self, state: ObjectState) -> usize {
        self.findings.iter().filter(|f| f.state() == state).count()
    }
}

/// Outcomes of re-driving a sweep's pending findings.
#[derive(Debug, Default)]
pub struct RedriveReport {
    pub reindexed: Vec<PipelineResult<IndexOutcome>>,
    pub redeleted: Vec<PipelineResult<DeleteOutcome>>,
}

impl RedriveReport {
    pub fn failures(&self) -> usize {
        self.reindexed.iter().filter(|r| r.is_err()).count()
            + self.redeleted.iter().filter(|r| r.is_err()).count()
    }
}

/// Compares the blob store with the index and re-drives the differences.
pub struct Reconciler {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn ConditionalKeyValueStore>,
    indexer: Indexer,
    deleter: Deleter,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn ConditionalKeyValueStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            indexer: Indexer::new(index.clone(), config),
            deleter: Deleter::new(blobs.clone(), index.clone(), config),
            blobs,
            index,
            timeout: config.store_timeout,
        }
    }

    /// Classify every object version of `bucket` known to either store.
    ///
    /// Noncurrent versions are listed too, so an indexed version that an
    /// overwrite pushed out of sight is still accounted for.
    pub async fn sweep(&self, bucket: &str) -> PipelineResult<SweepReport> {
        let listed = bounded(
            "ListObjectVersions",
            self.timeout,
            self.blobs.list_object_versions(bucket),
        )
        .await?;
        let rows = bounded("Scan", self.timeout, self.index.scan()).await?;

        // Indexed references, mapped to whether a tombstone exists.
        let mut indexed: BTreeMap<ObjectReference, bool> = BTreeMap::new();
        for row in rows.iter().filter(|r| r.bucket == bucket) {
            let tombstoned = indexed.entry(row.object_reference()).or_default();
            *tombstoned |= row.kind == RecordKind::Tombstone;
        }
        let stored: BTreeSet<&ObjectReference> = listed.iter().map(|m| &m.reference).collect();

        let mut findings = Vec::new();
        for meta in &listed {
            if !indexed.contains_key(&meta.reference) {
                findings.push(Finding::Orphaned {
                    reference: meta.reference.clone(),
                    size: meta.size,
                });
            }
        }
        for (reference, tombstoned) in indexed {
            let present = stored.contains(&reference);
            let finding = match (tombstoned, present) {
                (true, true) => Finding::Reappeared { reference },
                (true, false) => Finding::Reclaimed { reference },
                (false, true) => Finding::AwaitingDeletion { reference },
                (false, false) => Finding::MissingTombstone { reference },
            };
            findings.push(finding);
        }

        let report = SweepReport {
            bucket: bucket.to_string(),
            findings,
        };
        let pending = report.pending().count();
        if pending > 0 {
            warn!(bucket, pending, total = report.findings.len(), "sweep found inconsistencies");
        } else {
            info!(bucket, total = report.findings.len(), "sweep found store consistent");
        }
        Ok(report)
    }

    /// Push every pending finding back through the indexer or deleter.
    pub async fn redrive(&self, report: &SweepReport) -> RedriveReport {
        let mut events = Vec::new();
        let mut signals = Vec::new();
        for finding in report.pending() {
            match finding {
                Finding::Orphaned { reference, size } => {
                    events.push(ObjectCreatedEvent::synthetic(reference, *size));
                }
                Finding::AwaitingDeletion { reference }
                | Finding::MissingTombstone { reference }
                | Finding::Reappeared { reference } => signals.push(CommitSignal {
                    sequence: 0,
                    key: reference.index_key(),
                    reference: reference.clone(),
                }),
                Finding::Reclaimed { .. } => {}
            }
        }

        let indexer = self.indexer.clone();
        let reindexed = run_isolated(events, move |event| {
            let indexer = indexer.clone();
            async move { indexer.handle(&event).await }
        })
        .await;

        let deleter = self.deleter.clone();
        let redeleted = run_isolated(signals, move |signal| {
            let deleter = deleter.clone();
            async move { deleter.handle(&signal).await }
        })
        .await;

        let report = RedriveReport {
            reindexed,
            redeleted,
        };
        info!(
            reindexed = report.reindexed.len(),
            redeleted = report.redeleted.len(),
            failures = report.failures(),
            "re-drive finished"
        );
        report
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("table", &self.index.table_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
