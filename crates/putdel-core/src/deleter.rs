//! The deleter: reclaims a blob once its index row is committed.
//!
//! The deleter trusts its trigger. A [`CommitSignal`] is only produced from
//! a change feed insert, so the row is durable before the signal exists.
//! It never reads the index store to double-check.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use putdel_store::{BlobStore, Condition, ConditionalKeyValueStore, StoreError};
use putdel_types::{CommitSignal, IndexRecord, ObjectReference};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classify::{bounded, report_failure};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};

/// What the deleter did with one commit signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// This call removed the blob.
    Deleted { reference: ObjectReference },
    /// The blob was already gone, most likely removed by an earlier delivery.
    AlreadyGone { reference: ObjectReference },
    /// A newer write replaced this ETag-identified object and was left in
    /// place. The old bytes no longer exist. Version-id references never
    /// produce this outcome because their delete targets the exact version.
    Superseded {
        reference: ObjectReference,
        current_version: String,
    },
}

impl DeleteOutcome {
    pub fn reference(&self) -> &ObjectReference {
        match self {
            Self::Deleted { reference }
            | Self::AlreadyGone { reference }
            | Self::Superseded { reference, .. } => reference,
        }
    }

    /// Returns `true` only when this call removed the blob.
    pub fn removed_blob(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deleted { reference } => write!(f, "deleted {reference}"),
            Self::AlreadyGone { reference } => write!(f, "already gone {reference}"),
            Self::Superseded {
                reference,
                current_version,
            } => write!(f, "superseded {reference} (current {current_version})"),
        }
    }
}

/// Stateless deletion unit. Cheap to clone; clones share the store handles.
#[derive(Clone)]
pub struct Deleter {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn ConditionalKeyValueStore>,
    timeout: Duration,
}

impl Deleter {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn ConditionalKeyValueStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            blobs,
            index,
            timeout: config.store_timeout,
        }
    }

    /// Reclaim the blob named by `signal` and record its tombstone.
    pub async fn handle(&self, signal: &CommitSignal) -> PipelineResult<DeleteOutcome> {
        let subject = signal.reference.to_string();
        self.reclaim(signal).await.inspect_err(|err| {
            report_failure("deleter", &subject, err);
        })
    }

    async fn reclaim(&self, signal: &CommitSignal) -> PipelineResult<DeleteOutcome> {
        let reference = signal.reference.clone();
        reference.validate()?;

        let deleted = bounded(
            "DeleteObject",
            self.timeout,
            self.blobs.delete_object(&reference),
        )
        .await;

        let outcome = match deleted {
            Ok(()) => DeleteOutcome::Deleted { reference },
            Err(PipelineError::Store(StoreError::ObjectNotFound { .. })) => {
                debug!(%reference, sequence = signal.sequence, "object already gone");
                DeleteOutcome::AlreadyGone { reference }
            }
            Err(PipelineError::Store(StoreError::VersionMismatch { actual, .. })) => {
                info!(%reference, current_version = %actual, "newer version present, leaving it");
                DeleteOutcome::Superseded {
                    reference,
                    current_version: actual,
                }
            }
            Err(err) => return Err(err),
        };

        self.write_tombstone(outcome.reference()).await?;

        if outcome.removed_blob() {
            info!(
                reference = %outcome.reference(),
                sequence = signal.sequence,
                "object reclaimed"
            );
        }
        Ok(outcome)
    }

    /// Record that `reference` no longer occupies the blob store.
    ///
    /// The first tombstone wins; later deliveries find it present.
    async fn write_tombstone(&self, reference: &ObjectReference) -> PipelineResult<()> {
        let tombstone = IndexRecord::tombstone(reference, Utc::now());
        let written = bounded(
            "PutItem",
            self.timeout,
            self.index.put(&tombstone, Condition::IfAbsent),
        )
        .await;
        match written {
            Ok(()) | Err(PipelineError::Store(StoreError::ConditionFailed { .. })) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for Deleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deleter")
            .field("table", &self.index.table_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
