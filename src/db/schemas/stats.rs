//! Aggregate counter schema
//!
//! Small keyed counters incremented with `$inc`. The reunions counter is
//! guarded by the one-time close transition, so it counts each case at
//! most once.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::{IndexOptions, UpdateOptions};
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MongoCollection, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{Error, Result};

/// Collection name for counters
pub const STATS_COLLECTION: &str = "stats";

pub const COUNTER_CASES_REGISTERED: &str = "cases_registered";
pub const COUNTER_REUNIONS: &str = "reunions";

/// Counter document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StatsDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    pub key: String,

    #[serde(default)]
    pub value: i64,
}

impl IntoIndexes for StatsDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "key": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("key_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for StatsDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Atomically bump a keyed counter, creating it on first use
pub async fn increment_counter(stats: &MongoCollection<StatsDoc>, key: &str) -> Result<()> {
    let options = UpdateOptions::builder().upsert(true).build();

    stats
        .inner()
        .update_one(
            doc! { "key": key },
            doc! {
                "$inc": { "value": 1 },
                "$setOnInsert": { "metadata": { "is_deleted": false } },
            },
        )
        .with_options(options)
        .await
        .map_err(|e| Error::Database(format!("counter {}: {}", key, e)))?;

    Ok(())
}
