//! Change feed adapter: the deleter's only trigger.
//!
//! The consumer reads committed changes after its checkpoint, keeps the
//! inserts of object rows, and hands each one to the deleter as a
//! [`CommitSignal`]. Tombstone inserts and modifications are skipped.
//!
//! The checkpoint advances past every record read, including signals whose
//! deletion failed. Those objects stay indexed and are picked up by the
//! reconciliation sweep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use putdel_store::{ChangeRecord, ConditionalKeyValueStore};
use putdel_types::CommitSignal;
use tracing::{debug, info, warn};

use crate::classify::bounded;
use crate::config::PipelineConfig;
use crate::deleter::{DeleteOutcome, Deleter};
use crate::dispatch::run_isolated;
use crate::error::PipelineResult;

/// One poll of the change feed.
#[derive(Debug)]
pub struct FeedBatch {
    /// Checkpoint before the poll.
    pub from: u64,
    /// Checkpoint after the poll.
    pub checkpoint: u64,
    /// Signals handed to the deleter, in feed order.
    pub signals: Vec<CommitSignal>,
    /// Change records that produced no signal.
    pub skipped: usize,
    /// Deleter results, one per signal.
    pub results: Vec<PipelineResult<DeleteOutcome>>,
}

impl FeedBatch {
    /// Returns `true` if the poll read no change records.
    pub fn is_empty(&self) -> bool {
        self.from == self.checkpoint
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}

/// Polls the index change feed and drives the deleter.
pub struct FeedConsumer {
    index: Arc<dyn ConditionalKeyValueStore>,
    deleter: Deleter,
    checkpoint: u64,
    batch_size: usize,
    timeout: Duration,
}

impl FeedConsumer {
    pub fn new(
        index: Arc<dyn ConditionalKeyValueStore>,
        deleter: Deleter,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            index,
            deleter,
            checkpoint: 0,
            batch_size: config.feed_batch_size.max(1),
            timeout: config.store_timeout,
        }
    }

    /// Resume after `checkpoint` instead of from the start of the feed.
    pub fn with_checkpoint(mut self, checkpoint: u64) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Sequence of the last change record consumed.
    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    /// Read one batch of changes and deliver its signals.
    ///
    /// A failure to read the feed leaves the checkpoint untouched.
    pub async fn poll(&mut self) -> PipelineResult<FeedBatch> {
        let from = self.checkpoint;
        let changes = bounded(
            "GetRecords",
            self.timeout,
            self.index.changes_since(from, self.batch_size),
        )
        .await?;

        let checkpoint = changes.last().map_or(from, |c| c.sequence);
        let signals: Vec<CommitSignal> = changes.iter().filter_map(signal_for).collect();
        let skipped = changes.len() - signals.len();

        let deleter = self.deleter.clone();
        let results = run_isolated(signals.clone(), move |signal| {
            let deleter = deleter.clone();
            async move { deleter.handle(&signal).await }
        })
        .await;

        self.checkpoint = checkpoint;
        if !changes.is_empty() {
            debug!(from, checkpoint, signals = signals.len(), skipped, "feed batch consumed");
        }
        Ok(FeedBatch {
            from,
            checkpoint,
            signals,
            skipped,
            results,
        })
    }

    /// Poll until the feed is exhausted.
    pub async fn drain(&mut self) -> PipelineResult<Vec<FeedBatch>> {
        let mut batches = Vec::new();
        self.drain_into(&mut batches).await?;
        Ok(batches)
    }

    /// Poll until the feed is exhausted, appending each batch to `batches`
    /// as soon as it is consumed.
    ///
    /// If a later poll fails the error is returned, but the batches already
    /// consumed stay in `batches`. Their deletions have run and the
    /// checkpoint has moved past them.
    pub async fn drain_into(&mut self, batches: &mut Vec<FeedBatch>) -> PipelineResult<()> {
        let start = batches.len();
        let drained = loop {
            match self.poll().await {
                Ok(batch) if batch.is_empty() => break Ok(()),
                Ok(batch) => batches.push(batch),
                Err(err) => break Err(err),
            }
        };
        let consumed = &batches[start..];
        let signals: usize = consumed.iter().map(|b| b.signals.len()).sum();
        let failures: usize = consumed.iter().map(FeedBatch::failures).sum();
        match &drained {
            Ok(()) => info!(
                checkpoint = self.checkpoint,
                batches = consumed.len(),
                signals,
                failures,
                "change feed drained"
            ),
            Err(err) => warn!(
                checkpoint = self.checkpoint,
                batches = consumed.len(),
                signals,
                error = %err,
                "change feed read failed mid-drain"
            ),
        }
        drained
    }
}

impl fmt::Debug for FeedConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedConsumer")
            .field("table", &self.index.table_name())
            .field("checkpoint", &self.checkpoint)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

fn signal_for(change: &ChangeRecord) -> Option<CommitSignal> {
    change
        .inserted()
        .and_then(|record| CommitSignal::from_record(change.sequence, record))
}
