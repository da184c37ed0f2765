//! Notification fan-out service
//!
//! Every notification is appended to the durable per-user log first (the
//! source of truth), then best-effort pushed to whatever live sessions
//! the user has. No live session means no push; the log still has it.

pub mod registry;
pub mod stream;

pub use registry::ChannelRegistry;
pub use stream::{disconnect_all, handle_stream_upgrade, WsSink};

use async_trait::async_trait;
use bson::doc;
use futures_util::SinkExt;
use mongodb::options::UpdateOptions;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::schemas::{NotificationDoc, UserDoc};
use crate::db::MongoCollection;
use crate::types::Result;

/// A notification about to enter a user's log
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub message: String,
    pub clickable: bool,
    pub navigate_to: Option<String>,
}

impl NewNotification {
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            clickable: false,
            navigate_to: None,
        }
    }

    pub fn link(message: impl Into<String>, navigate_to: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            clickable: true,
            navigate_to: Some(navigate_to.into()),
        }
    }

    fn into_doc(self) -> NotificationDoc {
        NotificationDoc {
            id: Uuid::new_v4().to_string(),
            message: self.message,
            is_read: false,
            clickable: self.clickable,
            navigate_to: self.navigate_to,
            time: bson::DateTime::now().timestamp_millis(),
        }
    }
}

/// Notification delivery seam. Infallible by contract: delivery is
/// best-effort and failures stay inside the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: NewNotification);
}

/// Per-id outcome of a mark-read call, so callers can reconcile
/// optimistic client state
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadReceipt {
    pub updated: Vec<String>,
    pub already_read: Vec<String>,
    pub invalid: Vec<String>,
}

/// Partition requested ids against the durable log
pub fn partition_read_ids(log: &[NotificationDoc], ids: &[String]) -> ReadReceipt {
    let mut receipt = ReadReceipt::default();
    let mut seen = std::collections::HashSet::new();

    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match log.iter().find(|n| &n.id == id) {
            Some(n) if n.is_read => receipt.already_read.push(id.clone()),
            Some(_) => receipt.updated.push(id.clone()),
            None => receipt.invalid.push(id.clone()),
        }
    }

    receipt
}

/// Initial payload for a fresh stream subscription
#[derive(Debug, Clone, Serialize)]
pub struct InitialBatch {
    pub notifications: Vec<NotificationDoc>,
    pub unread_count: usize,
    pub page: PageDescriptor,
}

/// Pagination descriptor for fetching older notifications
#[derive(Debug, Clone, Serialize)]
pub struct PageDescriptor {
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<i64>,
}

/// Select the most recent `limit` notifications, newest first, with a
/// cursor to the remainder
pub fn initial_window(
    log: &[NotificationDoc],
    limit: usize,
    page_size: usize,
) -> InitialBatch {
    let unread_count = log.iter().filter(|n| !n.is_read).count();

    let mut notifications: Vec<NotificationDoc> =
        log.iter().rev().take(limit).cloned().collect();
    notifications.sort_by(|a, b| b.time.cmp(&a.time));

    let next_before = if log.len() > notifications.len() {
        notifications.last().map(|n| n.time)
    } else {
        None
    };

    InitialBatch {
        notifications,
        unread_count,
        page: PageDescriptor {
            size: page_size,
            next_before,
        },
    }
}

/// Durable log + live push
pub struct NotificationService {
    users: MongoCollection<UserDoc>,
    registry: Arc<ChannelRegistry<WsSink>>,
}

impl NotificationService {
    pub fn new(users: MongoCollection<UserDoc>, registry: Arc<ChannelRegistry<WsSink>>) -> Self {
        Self { users, registry }
    }

    /// Append to the durable log. Creates the user document if the
    /// identity provider has not materialized it yet.
    async fn append(&self, user_id: &str, notification: NewNotification) -> Result<NotificationDoc> {
        let entry = notification.into_doc();
        let entry_bson = bson::to_bson(&entry)
            .map_err(|e| crate::types::Error::Internal(format!("notification encode: {}", e)))?;

        let options = UpdateOptions::builder().upsert(true).build();
        self.users
            .inner()
            .update_one(
                doc! { "identifier": user_id },
                doc! {
                    "$push": { "notifications": entry_bson },
                    "$setOnInsert": {
                        "role": "general",
                        "case_ids": [],
                        "metadata": { "is_deleted": false },
                    },
                },
            )
            .with_options(options)
            .await
            .map_err(|e| crate::types::Error::Database(format!("notification append: {}", e)))?;

        Ok(entry)
    }

    /// Push to every live session of `user_id`. Fire-and-forget: a dead
    /// sink is cleaned up by its own session handler.
    async fn push_live(&self, user_id: &str, entry: &NotificationDoc) {
        let sinks = self.registry.sinks(user_id);
        if sinks.is_empty() {
            return;
        }

        let event = stream::notification_event(entry);
        for sink in sinks {
            let mut guard = sink.lock().await;
            if let Err(e) = guard.send(Message::Text(event.clone())).await {
                debug!(user_id, "live push failed: {}", e);
            }
        }
    }

    /// Most recent notifications + unread count for a fresh subscription
    pub async fn initial_batch(
        &self,
        user_id: &str,
        limit: usize,
        page_size: usize,
    ) -> Result<InitialBatch> {
        let user = self.users.find_one(doc! { "identifier": user_id }).await?;
        let log = user.map(|u| u.notifications).unwrap_or_default();
        Ok(initial_window(&log, limit, page_size))
    }

    /// Mark an explicit id set as read. Idempotent.
    pub async fn mark_read(&self, user_id: &str, ids: &[String]) -> Result<ReadReceipt> {
        let user = self.users.find_one(doc! { "identifier": user_id }).await?;

        let Some(user) = user else {
            // No log yet: every requested id is unknown
            return Ok(ReadReceipt {
                invalid: ids.to_vec(),
                ..ReadReceipt::default()
            });
        };

        let receipt = partition_read_ids(&user.notifications, ids);
        self.apply_read(&user.identifier, &receipt.updated).await?;
        Ok(receipt)
    }

    /// Mark every unread notification as read. Idempotent.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<ReadReceipt> {
        let user = self.users.find_one(doc! { "identifier": user_id }).await?;

        let Some(user) = user else {
            return Ok(ReadReceipt::default());
        };

        let unread: Vec<String> = user
            .notifications
            .iter()
            .filter(|n| !n.is_read)
            .map(|n| n.id.clone())
            .collect();

        let receipt = ReadReceipt {
            updated: unread,
            ..ReadReceipt::default()
        };
        self.apply_read(&user.identifier, &receipt.updated).await?;
        Ok(receipt)
    }

    async fn apply_read(&self, user_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let options = UpdateOptions::builder()
            .array_filters(vec![doc! {
                "n.id": { "$in": ids },
                "n.is_read": false,
            }])
            .build();

        self.users
            .inner()
            .update_one(
                doc! { "identifier": user_id },
                doc! { "$set": { "notifications.$[n].is_read": true } },
            )
            .with_options(options)
            .await
            .map_err(|e| crate::types::Error::Database(format!("mark read: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, user_id: &str, notification: NewNotification) {
        match self.append(user_id, notification).await {
            Ok(entry) => self.push_live(user_id, &entry).await,
            Err(e) => warn!(user_id, "notification dropped: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, is_read: bool, time: i64) -> NotificationDoc {
        NotificationDoc {
            id: id.to_string(),
            message: format!("message {}", id),
            is_read,
            clickable: false,
            navigate_to: None,
            time,
        }
    }

    #[test]
    fn test_partition_read_ids() {
        let log = vec![entry("a", false, 1), entry("b", true, 2), entry("c", false, 3)];
        let ids = vec![
            "a".to_string(),
            "b".to_string(),
            "missing".to_string(),
            "a".to_string(), // duplicate collapses
        ];

        let receipt = partition_read_ids(&log, &ids);
        assert_eq!(receipt.updated, vec!["a"]);
        assert_eq!(receipt.already_read, vec!["b"]);
        assert_eq!(receipt.invalid, vec!["missing"]);
    }

    #[test]
    fn test_initial_window_newest_first() {
        let log: Vec<NotificationDoc> = (1..=5).map(|i| entry(&i.to_string(), i < 3, i)).collect();

        let batch = initial_window(&log, 3, 20);
        let ids: Vec<&str> = batch.notifications.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["5", "4", "3"]);
        assert_eq!(batch.unread_count, 3);
        assert_eq!(batch.page.next_before, Some(3));
    }

    #[test]
    fn test_initial_window_exhausted_log_has_no_cursor() {
        let log = vec![entry("a", false, 1), entry("b", false, 2)];

        let batch = initial_window(&log, 20, 20);
        assert_eq!(batch.notifications.len(), 2);
        assert_eq!(batch.page.next_before, None);
    }

    #[test]
    fn test_initial_window_empty_log() {
        let batch = initial_window(&[], 20, 20);
        assert!(batch.notifications.is_empty());
        assert_eq!(batch.unread_count, 0);
        assert_eq!(batch.page.next_before, None);
    }
}
