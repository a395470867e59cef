//! Store contracts for putdel.
//!
//! The pipeline depends only on two narrow capabilities:
//!
//! - [`ConditionalKeyValueStore`] -- the index table: put-if-absent,
//!   all-or-nothing transactions, and an ordered change feed
//! - [`BlobStore`] -- the landing zone: put, head, list, and a
//!   version-conditional, idempotent delete
//!
//! # Backends
//!
//! - [`InMemoryIndexStore`] and [`InMemoryBlobStore`] -- `BTreeMap`-based
//!   stores for tests, demos and embedding, with fault injection through
//!   [`FaultInjector`]
//!
//! # Design Rules
//!
//! 1. A conditional write either applies completely or not at all.
//! 2. A change record exists only for a write that was applied.
//! 3. "Not found" is a distinct error so callers can treat it as benign.
//! 4. All failures are returned, never swallowed.

pub mod error;
pub mod fault;
pub mod feed;
pub mod memory;
pub mod traits;
pub mod transaction;

pub use error::{StoreError, StoreResult};
pub use fault::FaultInjector;
pub use feed::{ChangeKind, ChangeRecord};
pub use memory::{InMemoryBlobStore, InMemoryIndexStore};
pub use traits::{BlobStore, ConditionalKeyValueStore, ObjectMeta};
pub use transaction::{CancellationReason, Condition, TransactItem};
