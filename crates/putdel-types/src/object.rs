use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::key::IndexKey;

/// What the `version` of an [`ObjectReference`] identifies.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    /// A content hash. Only the current object at the key can carry it, so an
    /// overwrite destroys the old bytes.
    #[default]
    #[serde(rename = "etag")]
    ETag,
    /// A version-id in a versioned bucket. The version keeps its bytes after
    /// an overwrite until it is deleted by id.
    VersionId,
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ETag => write!(f, "etag"),
            Self::VersionId => write!(f, "version-id"),
        }
    }
}

/// Identity of a single blob in the object store.
///
/// `version` is the object's version-id when the bucket is versioned and its
/// ETag otherwise; `version_kind` says which. A reference without a version
/// cannot be indexed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    pub bucket: String,
    pub key: String,
    pub version: String,
    #[serde(default)]
    pub version_kind: VersionKind,
}

impl ObjectReference {
    /// A reference identified by ETag.
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::with_kind(bucket, key, version, VersionKind::ETag)
    }

    /// A reference identified by the version-id of a versioned bucket.
    pub fn versioned(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        Self::with_kind(bucket, key, version_id, VersionKind::VersionId)
    }

    pub fn with_kind(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version: impl Into<String>,
        version_kind: VersionKind,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version: version.into(),
            version_kind,
        }
    }

    /// Check that the reference can be indexed.
    ///
    /// Bucket names never contain `/`, which keeps the partition key
    /// unambiguous.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.bucket.is_empty() {
            return Err(TypeError::InvalidReference {
                field: "bucket",
                reason: "must not be empty".into(),
            });
        }
        if self.bucket.contains('/') {
            return Err(TypeError::InvalidReference {
                field: "bucket",
                reason: "must not contain '/'".into(),
            });
        }
        if self.key.is_empty() {
            return Err(TypeError::InvalidReference {
                field: "key",
                reason: "must not be empty".into(),
            });
        }
        // Without a version the delete could not be scoped to this write.
        if self.version.is_empty() {
            return Err(TypeError::InvalidReference {
                field: "version",
                reason: "neither version-id nor etag present".into(),
            });
        }
        Ok(())
    }

    /// The key of this object's index row.
    pub fn index_key(&self) -> IndexKey {
        IndexKey::for_object(self)
    }

    /// The key of this object's tombstone row.
    pub fn tombstone_key(&self) -> IndexKey {
        IndexKey::for_tombstone(self)
    }

    /// Returns `true` if `version` is a version-id.
    pub fn is_versioned(&self) -> bool {
        self.version_kind == VersionKind::VersionId
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}@{}", self.bucket, self.key, self.version)
    }
}
