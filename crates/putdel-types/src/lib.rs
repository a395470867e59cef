//! Foundation types for putdel.
//!
//! putdel indexes objects that land in a blob store and reclaims the blob
//! once its index row is durably committed. This crate holds the shared
//! vocabulary every other putdel crate speaks.
//!
//! # Key Types
//!
//! - [`ObjectReference`] -- `(bucket, key, version)` identity of a blob
//! - [`IndexKey`] -- deterministic `(PK, SK)` pair derived from a reference
//! - [`IndexRecord`] -- the durable row (object row or tombstone)
//! - [`ObjectCreatedEvent`] -- inbound "Object Created" notification envelope
//! - [`CommitSignal`] -- the trigger handed to the deleter
//! - [`ObjectState`] -- per-reference lifecycle state machine

pub mod error;
pub mod event;
pub mod key;
pub mod object;
pub mod record;
pub mod state;

pub use error::TypeError;
pub use event::{CommitSignal, DispatchRule, ObjectCreatedEvent, ObjectDetail};
pub use key::{IndexKey, RecordKind};
pub use object::{ObjectReference, VersionKind};
pub use record::IndexRecord;
pub use state::{ObjectState, Transition};
