//! User document schema
//!
//! Stores the user's role, owned-case list, and the durable notification
//! log that backs real-time delivery.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// One durable notification in a user's log.
///
/// `time` is epoch milliseconds so entries serialize identically to BSON
/// and to the stream's JSON events.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationDoc {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub clickable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigate_to: Option<String>,
    pub time: i64,
}

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// User identifier, the JWT subject
    pub identifier: String,

    #[serde(default)]
    pub role: Role,

    /// Cases this user is the listed owner of. Append-only; a case id is
    /// added at most once.
    #[serde(default)]
    pub case_ids: Vec<String>,

    /// Durable notification log, append-only, newest served first
    #[serde(default)]
    pub notifications: Vec<NotificationDoc>,
}

impl UserDoc {
    pub fn new(identifier: String, role: Role) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            identifier,
            role,
            case_ids: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "identifier": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("identifier_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unread_count() {
        let mut user = UserDoc::new("amira".into(), Role::General);
        assert_eq!(user.unread_count(), 0);

        user.notifications.push(NotificationDoc {
            id: "a".into(),
            message: "first".into(),
            is_read: true,
            clickable: false,
            navigate_to: None,
            time: 1,
        });
        user.notifications.push(NotificationDoc {
            id: "b".into(),
            message: "second".into(),
            is_read: false,
            clickable: false,
            navigate_to: None,
            time: 2,
        });

        assert_eq!(user.unread_count(), 1);
    }
}
