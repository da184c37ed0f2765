//! Database schemas for Reunite
//!
//! Defines MongoDB document structures for cases, users, and aggregate
//! counters. The `flags`, `timelines`, `case_ids` and `notifications`
//! arrays are append-only.

mod case;
mod stats;
mod user;

pub use case::{
    CaseDoc, CaseStatus, FlagEntry, FlagReason, TimelineEntry, CASE_COLLECTION, ENTRY_ORIGIN,
};
pub use stats::{
    increment_counter, StatsDoc, COUNTER_CASES_REGISTERED, COUNTER_REUNIONS, STATS_COLLECTION,
};
pub use user::{NotificationDoc, UserDoc, USER_COLLECTION};

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Common metadata carried by every document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamp
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }
}
