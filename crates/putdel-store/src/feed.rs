//! Change feed records.
//!
//! Every applied mutation of the index table appends one [`ChangeRecord`]
//! carrying before/after images. Sequence numbers start at 1 and increase
//! strictly, so a consumer resumes by remembering the last sequence it
//! finished.

use chrono::{DateTime, Utc};
use putdel_types::{IndexKey, IndexRecord};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub sequence: u64,
    pub kind: ChangeKind,
    pub key: IndexKey,
    pub old_image: Option<IndexRecord>,
    pub new_image: Option<IndexRecord>,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// The row this change inserted, if it was an insert.
    pub fn inserted(&self) -> Option<&IndexRecord> {
        match self.kind {
            ChangeKind::Insert => self.new_image.as_ref(),
            ChangeKind::Modify | ChangeKind::Remove => None,
        }
    }
}
