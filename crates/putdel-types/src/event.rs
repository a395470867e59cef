//! Inbound events: object-created notifications and commit signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::key::IndexKey;
use crate::object::{ObjectReference, VersionKind};
use crate::record::IndexRecord;

/// Event source of object store notifications.
pub const OBJECT_STORE_SOURCE: &str = "aws.s3";

/// Detail type of the only notification the indexer acts on.
pub const OBJECT_CREATED: &str = "Object Created";

/// Notification envelope delivered by the event bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreatedEvent {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub detail: ObjectDetail,
}

/// The `detail` body of an object store notification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetail {
    #[serde(default)]
    pub version: String,
    pub bucket: BucketDetail,
    pub object: ObjectAttributes,
    #[serde(rename = "request-id", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(
        rename = "source-ip-address",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDetail {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub etag: String,
    #[serde(rename = "version-id", default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<String>,
}

impl ObjectCreatedEvent {
    /// Decode a notification from its JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self, TypeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Build an "Object Created" notification for an object written by this
    /// process (the flow driver and the reconciliation re-drive).
    pub fn synthetic(reference: &ObjectReference, size: u64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            source: OBJECT_STORE_SOURCE.into(),
            detail_type: OBJECT_CREATED.into(),
            time: Some(Utc::now()),
            detail: ObjectDetail {
                version: "0".into(),
                bucket: BucketDetail {
                    name: reference.bucket.clone(),
                },
                object: Self::attributes(reference, size),
                reason: Some("PutObject".into()),
                ..Default::default()
            },
        }
    }

    fn attributes(reference: &ObjectReference, size: u64) -> ObjectAttributes {
        let (etag, version_id) = match reference.version_kind {
            VersionKind::ETag => (reference.version.clone(), None),
            VersionKind::VersionId => (String::new(), Some(reference.version.clone())),
        };
        ObjectAttributes {
            key: reference.key.clone(),
            size,
            etag,
            version_id,
            sequencer: None,
        }
    }

    pub fn is_object_created(&self) -> bool {
        self.source == OBJECT_STORE_SOURCE && self.detail_type == OBJECT_CREATED
    }

    pub fn bucket(&self) -> &str {
        &self.detail.bucket.name
    }

    /// Extract and validate the object identity.
    ///
    /// The version-id wins over the ETag when the bucket is versioned. A
    /// notification carrying neither is rejected.
    pub fn object_reference(&self) -> Result<ObjectReference, TypeError> {
        let object = &self.detail.object;
        let bucket = &self.detail.bucket.name;
        let reference = match object.version_id.as_deref() {
            Some(id) if !id.is_empty() => ObjectReference::versioned(bucket, &object.key, id),
            _ => ObjectReference::new(bucket, &object.key, &object.etag),
        };
        reference.validate()?;
        Ok(reference)
    }
}

/// Routing filter equivalent to the event bus rule in front of the indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRule {
    pub source: String,
    pub detail_type: String,
    /// Only events for this bucket pass. `None` accepts any bucket.
    pub bucket: Option<String>,
}

impl DispatchRule {
    /// The "Object Created" rule, optionally scoped to one bucket.
    pub fn object_created(bucket: Option<String>) -> Self {
        Self {
            source: OBJECT_STORE_SOURCE.into(),
            detail_type: OBJECT_CREATED.into(),
            bucket,
        }
    }

    pub fn matches(&self, event: &ObjectCreatedEvent) -> bool {
        if event.source != self.source || event.detail_type != self.detail_type {
            return false;
        }
        match &self.bucket {
            Some(bucket) => event.bucket() == bucket,
            None => true,
        }
    }
}

/// Evidence that an object row is durably committed.
///
/// Produced from a change feed insert, so it can never precede the
/// conditional write that created the row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSignal {
    /// Change feed position the signal was read from.
    pub sequence: u64,
    pub key: IndexKey,
    pub reference: ObjectReference,
}

impl CommitSignal {
    /// Build a signal from a committed row. Tombstones yield `None`.
    pub fn from_record(sequence: u64, record: &IndexRecord) -> Option<Self> {
        if !record.is_object() {
            return None;
        }
        Some(Self {
            sequence,
            key: record.index_key(),
            reference: record.object_reference(),
        })
    }
}
