use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::{IndexKey, RecordKind};
use crate::object::{ObjectReference, VersionKind};

/// A durable row in the index store.
///
/// Both row kinds carry `bucket`, `key` and `source_version` so that a
/// consumer of the change feed can rebuild the [`ObjectReference`] without a
/// second lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    pub kind: RecordKind,
    pub bucket: String,
    pub key: String,
    pub source_version: String,
    /// Whether `source_version` is a version-id or an ETag.
    #[serde(default)]
    pub version_kind: VersionKind,
    /// Object size in bytes as reported by the notification.
    #[serde(default)]
    pub size: u64,
    /// Per-key ordering token from the object store, if one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IndexRecord {
    /// Build the object row for a newly observed reference.
    pub fn object(
        reference: &ObjectReference,
        size: u64,
        sequencer: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::build(reference, RecordKind::Object, size, sequencer, created_at)
    }

    /// Build the tombstone row recording that `reference` was reclaimed.
    pub fn tombstone(reference: &ObjectReference, created_at: DateTime<Utc>) -> Self {
        Self::build(reference, RecordKind::Tombstone, 0, None, created_at)
    }

    fn build(
        reference: &ObjectReference,
        kind: RecordKind,
        size: u64,
        sequencer: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let IndexKey { pk, sk } = IndexKey::derive(reference, kind);
        Self {
            pk,
            sk,
            kind,
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            source_version: reference.version.clone(),
            version_kind: reference.version_kind,
            size,
            sequencer,
            created_at,
        }
    }

    pub fn index_key(&self) -> IndexKey {
        IndexKey::new(self.pk.clone(), self.sk.clone())
    }

    /// The reference this row was written for.
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference::with_kind(
            &self.bucket,
            &self.key,
            &self.source_version,
            self.version_kind,
        )
    }

    pub fn is_object(&self) -> bool {
        self.kind == RecordKind::Object
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == RecordKind::Tombstone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn object_row_carries_reference() {
        let r = ObjectReference::new("b", "f1", "v1");
        let rec = IndexRecord::object(&r, 11, Some("00A1".into()), at());
        assert!(rec.is_object());
        assert_eq!(rec.index_key(), r.index_key());
        assert_eq!(rec.object_reference(), r);
        assert_eq!(rec.size, 11);
    }

    #[test]
    fn tombstone_row_has_tombstone_key() {
        let r = ObjectReference::new("b", "f1", "v1");
        let rec = IndexRecord::tombstone(&r, at());
        assert!(rec.is_tombstone());
        assert_eq!(rec.index_key(), r.tombstone_key());
        assert_eq!(rec.object_reference(), r);
    }

    #[test]
    fn version_id_survives_the_row() {
        let r = ObjectReference::versioned("b", "f1", "3HL4kqtJlcpXroDTDmJ");
        let rec = IndexRecord::object(&r, 1, None, at());
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["version_kind"], "version_id");
        let back: IndexRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.object_reference(), r);
    }

    #[test]
    fn json_uses_table_attribute_names() {
        let r = ObjectReference::new("b", "f1", "v1");
        let json = serde_json::to_value(IndexRecord::object(&r, 1, None, at())).unwrap();
        assert_eq!(json["PK"], "OBJECT#b/f1");
        assert_eq!(json["SK"], "OBJECT#v1");
        assert_eq!(json["kind"], "object");
        assert!(json.get("sequencer").is_none());
    }
}
