//! The index-then-reclaim protocol.
//!
//! An object written to the blob store is first recorded in the index by
//! the [`Indexer`] through a single conditional transaction. The committed
//! row surfaces on the index change feed, where the [`FeedConsumer`] turns
//! it into a commit signal for the [`Deleter`]. The blob is therefore never
//! removed before its row is durable, and every step tolerates duplicate
//! delivery.
//!
//! # Components
//!
//! - [`Indexer`] -- notification in, conditional put-if-absent out
//! - [`Deleter`] -- commit signal in, version-conditional delete plus tombstone
//! - [`FeedConsumer`] -- change feed polling with a resumable checkpoint
//! - [`Pipeline`] -- the three wired together, with a lifecycle [`Journal`]
//! - [`Reconciler`] -- read-only sweep and idempotent re-drive
//!
//! Failures are classified by [`FailureClass`] and stay local to the event
//! that caused them.

pub mod classify;
pub mod config;
pub mod deleter;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod indexer;
pub mod pipeline;
pub mod reconcile;

pub use classify::{classify_store_error, FailureClass};
pub use config::PipelineConfig;
pub use deleter::{DeleteOutcome, Deleter};
pub use dispatch::run_isolated;
pub use error::{PipelineError, PipelineResult};
pub use feed::{FeedBatch, FeedConsumer};
pub use indexer::{IndexOutcome, Indexer};
pub use pipeline::{IngestSummary, Journal, Pipeline, ReclaimSummary, Violation};
pub use reconcile::{Finding, Reconciler, RedriveReport, SweepReport};
