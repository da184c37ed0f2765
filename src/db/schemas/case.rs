//! Case document schema
//!
//! A case is a missing- or found-person report. Its two face-embedding
//! vectors live in the vector index under the case's jurisdiction
//! namespace and exist only while the case does.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for cases
pub const CASE_COLLECTION: &str = "cases";

/// Origin recorded on flag and timeline entries produced by this surface
pub const ENTRY_ORIGIN: &str = "web";

/// Case lifecycle states. `Closed` is terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    #[default]
    Missing,
    Found,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Missing => "missing",
            CaseStatus::Found => "found",
            CaseStatus::Closed => "closed",
        }
    }

    /// The status a similarity search should look for. Closed cases have
    /// no counterpart.
    pub fn opposite(&self) -> Option<CaseStatus> {
        match self {
            CaseStatus::Missing => Some(CaseStatus::Found),
            CaseStatus::Found => Some(CaseStatus::Missing),
            CaseStatus::Closed => None,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed set of reasons a case can be flagged for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    Spam,
    FalseInformation,
    InappropriateContent,
    Duplicate,
    Other,
}

impl FlagReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagReason::Spam => "spam",
            FlagReason::FalseInformation => "false_information",
            FlagReason::InappropriateContent => "inappropriate_content",
            FlagReason::Duplicate => "duplicate",
            FlagReason::Other => "other",
        }
    }
}

/// One flag raised against a case. At most one per (case, actor).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FlagEntry {
    pub actor_id: String,
    pub role: String,
    pub reason: FlagReason,
    pub timestamp: DateTime,
    pub origin: String,
}

/// One timeline event on a case
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TimelineEntry {
    pub entry_type: String,
    pub message: String,
    pub timestamp: DateTime,
    pub origin: String,
}

impl TimelineEntry {
    pub fn new(entry_type: &str, message: String) -> Self {
        Self {
            entry_type: entry_type.to_string(),
            message,
            timestamp: DateTime::now(),
            origin: ENTRY_ORIGIN.to_string(),
        }
    }
}

/// Case document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CaseDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    pub full_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,

    /// "male" or "female"; used as an exact-match filter in similarity search
    pub gender: String,

    /// Official reference number, unique within a jurisdiction
    pub case_ref_number: String,

    /// Vector-index namespace for this case
    pub jurisdiction: String,

    /// Placeholder at registration, later overwritten by the summary worker
    pub description: String,

    pub status: CaseStatus,

    /// Snapshot of `status` taken exactly at closure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_status: Option<CaseStatus>,

    /// Monotonic: once true, never reset
    #[serde(default)]
    pub is_assigned: bool,

    pub owner_id: String,

    /// Role of the actor the case is attributed to
    pub reported_by: String,

    #[serde(default = "default_true")]
    pub visible: bool,

    #[serde(default)]
    pub is_flagged: bool,

    /// Append-only
    #[serde(default)]
    pub flags: Vec<FlagEntry>,

    /// Append-only
    #[serde(default)]
    pub timelines: Vec<TimelineEntry>,

    /// Cooldown anchor for similarity search
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_searched_time: Option<DateTime>,

    /// When the person went missing / was found
    pub date_missing_found: DateTime,

    pub last_seen_location: String,

    pub contact_phone: String,
}

fn default_true() -> bool {
    true
}

impl Default for CaseDoc {
    fn default() -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            full_name: String::new(),
            age: None,
            gender: String::new(),
            case_ref_number: String::new(),
            jurisdiction: String::new(),
            description: String::new(),
            status: CaseStatus::default(),
            original_status: None,
            is_assigned: false,
            owner_id: String::new(),
            reported_by: String::new(),
            visible: true,
            is_flagged: false,
            flags: Vec::new(),
            timelines: Vec::new(),
            last_searched_time: None,
            date_missing_found: DateTime::from_millis(0),
            last_seen_location: String::new(),
            contact_phone: String::new(),
        }
    }
}

impl IntoIndexes for CaseDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Reference numbers are unique per jurisdiction
            (
                doc! { "jurisdiction": 1, "case_ref_number": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("jurisdiction_ref_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "owner_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CaseDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_status() {
        assert_eq!(CaseStatus::Missing.opposite(), Some(CaseStatus::Found));
        assert_eq!(CaseStatus::Found.opposite(), Some(CaseStatus::Missing));
        assert_eq!(CaseStatus::Closed.opposite(), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&CaseStatus::Missing).unwrap();
        assert_eq!(json, "\"missing\"");
        let json = serde_json::to_string(&CaseStatus::Closed).unwrap();
        assert_eq!(json, "\"closed\"");
    }

    #[test]
    fn test_flag_reason_snake_case() {
        let json = serde_json::to_string(&FlagReason::FalseInformation).unwrap();
        assert_eq!(json, "\"false_information\"");
    }
}
