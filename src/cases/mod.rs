//! Case state machine
//!
//! Guarded transitions over a case record: flag, assign, close. Every
//! transition is a single `find_one_and_update` with its guard in the
//! filter, so concurrent actors cannot double-fire an effect. Each
//! transition appends its timeline entry and enqueues notifications
//! through the side-effect outbox.

use bson::{doc, oid::ObjectId, DateTime};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{can_perform, Actor, CaseAction};
use crate::db::schemas::{
    increment_counter, CaseDoc, CaseStatus, FlagEntry, FlagReason, StatsDoc, TimelineEntry,
    UserDoc, COUNTER_REUNIONS, ENTRY_ORIGIN,
};
use crate::db::MongoCollection;
use crate::notify::{NewNotification, Notifier};
use crate::outbox::{Outbox, RetryPolicy, SideEffect};
use crate::registration::ANONYMOUS_OWNER;
use crate::types::{Error, Result};
use crate::vector::{vector_id, VectorIndex};

/// Every fifth flag hides the case and alerts its owner
pub const FLAG_THRESHOLD: usize = 5;

/// Whether this flag count lands on a review threshold
pub fn crossed_threshold(count: usize) -> bool {
    count > 0 && count % FLAG_THRESHOLD == 0
}

/// Guarded case transitions
pub struct CaseService {
    cases: MongoCollection<CaseDoc>,
    users: MongoCollection<UserDoc>,
    stats: MongoCollection<StatsDoc>,
    vectors: Arc<dyn VectorIndex>,
    notifier: Arc<dyn Notifier>,
    outbox: Outbox,
}

impl CaseService {
    pub fn new(
        cases: MongoCollection<CaseDoc>,
        users: MongoCollection<UserDoc>,
        stats: MongoCollection<StatsDoc>,
        vectors: Arc<dyn VectorIndex>,
        notifier: Arc<dyn Notifier>,
        outbox: Outbox,
    ) -> Self {
        Self {
            cases,
            users,
            stats,
            vectors,
            notifier,
            outbox,
        }
    }

    /// Raise a flag against a case.
    ///
    /// The push and the count read are one atomic operation; a separate
    /// push-then-read would let two concurrent flaggers both observe the
    /// threshold and double-fire the hide-and-notify effect.
    pub async fn flag(&self, actor: &Actor, case_id: &str, reason: FlagReason) -> Result<()> {
        let oid = ObjectId::parse_str(case_id)?;

        let case = self
            .cases
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| Error::NotFound("case".to_string()))?;

        // Hidden cases are indistinguishable from absent ones
        if !case.visible {
            return Err(Error::NotFound("case".to_string()));
        }
        if case.status == CaseStatus::Closed {
            return Err(Error::Conflict("case is closed".to_string()));
        }

        can_perform(actor, &[], &case, CaseAction::Flag)?;

        let entry = FlagEntry {
            actor_id: actor.id.clone(),
            role: actor.role.as_str().to_string(),
            reason,
            timestamp: DateTime::now(),
            origin: ENTRY_ORIGIN.to_string(),
        };
        let entry_bson = bson::to_bson(&entry)
            .map_err(|e| Error::Internal(format!("flag encode: {}", e)))?;

        let updated = self
            .cases
            .find_one_and_update(
                doc! {
                    "_id": oid,
                    "visible": true,
                    "status": { "$ne": "closed" },
                    "owner_id": { "$ne": &actor.id },
                    "flags.actor_id": { "$ne": &actor.id },
                },
                doc! {
                    "$push": { "flags": entry_bson },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;

        let Some(updated) = updated else {
            // The precheck passed, so the guard that failed is the
            // per-actor one (or a concurrent transition)
            if case.flags.iter().any(|f| f.actor_id == actor.id) {
                return Err(Error::Conflict(
                    "you have already flagged this case".to_string(),
                ));
            }
            return Err(Error::Conflict(
                "case is no longer open to flagging".to_string(),
            ));
        };

        let count = updated.flags.len();
        info!(case_id, actor = %actor.id, count, "case flagged");

        if crossed_threshold(count) {
            // The latch only moves false -> true, so a count that lands on
            // a threshold while the case is already flagged fires nothing
            let latch = self
                .cases
                .update_one(
                    doc! { "_id": oid, "is_flagged": false },
                    doc! { "$set": {
                        "is_flagged": true,
                        "visible": false,
                        "metadata.updated_at": DateTime::now(),
                    }},
                )
                .await?;

            if latch.modified_count == 1 {
                warn!(case_id, count, "flag threshold reached, case hidden");
                self.enqueue_notification(
                    "flag-threshold-notification",
                    updated.owner_id.clone(),
                    NewNotification::plain(format!(
                        "Your case {} was flagged for review and is temporarily hidden",
                        updated.case_ref_number
                    )),
                );
            }
        }

        Ok(())
    }

    /// Hand a case to another user. One-shot: `is_assigned` never resets.
    pub async fn assign(&self, actor: &Actor, case_id: &str, target_user_id: &str) -> Result<()> {
        let oid = ObjectId::parse_str(case_id)?;

        let case = self
            .cases
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| Error::NotFound("case".to_string()))?;

        can_perform(actor, &[], &case, CaseAction::Assign)?;

        if case.is_assigned {
            return Err(Error::Conflict("case is already assigned".to_string()));
        }

        let target = self
            .users
            .find_one(doc! { "identifier": target_user_id })
            .await?
            .ok_or_else(|| Error::NotFound("user".to_string()))?;

        let timeline = TimelineEntry::new(
            "assigned",
            format!(
                "Case assigned to {} ({}) by {}",
                target.identifier,
                target.role,
                actor.id
            ),
        );
        let timeline_bson = bson::to_bson(&timeline)
            .map_err(|e| Error::Internal(format!("timeline encode: {}", e)))?;

        let updated = self
            .cases
            .find_one_and_update(
                doc! { "_id": oid, "is_assigned": false },
                doc! {
                    "$set": {
                        "is_assigned": true,
                        "owner_id": &target.identifier,
                        "reported_by": target.role.as_str(),
                        "metadata.updated_at": DateTime::now(),
                    },
                    "$push": { "timelines": timeline_bson },
                },
            )
            .await?;

        if updated.is_none() {
            return Err(Error::Conflict("case is already assigned".to_string()));
        }

        // The target becomes the listed owner; this gate is what `close`
        // checks, so it is part of the primary write, not a side effect
        self.users
            .update_one(
                doc! { "identifier": &target.identifier, "case_ids": { "$ne": case_id } },
                doc! { "$push": { "case_ids": case_id } },
            )
            .await?;

        info!(case_id, target = %target.identifier, by = %actor.id, "case assigned");

        self.enqueue_notification(
            "assign-target-notification",
            target.identifier.clone(),
            NewNotification::link(
                format!("Case {} has been assigned to you", case.case_ref_number),
                format!("/cases/{}", case_id),
            ),
        );
        self.enqueue_notification(
            "assign-actor-notification",
            actor.id.clone(),
            NewNotification::plain(format!(
                "Case {} was assigned to {}",
                case.case_ref_number, target.identifier
            )),
        );

        Ok(())
    }

    /// Close a case. Terminal: `status` reaches `closed` at most once, and
    /// `original_status` is snapshotted exactly at that transition.
    pub async fn close(
        &self,
        actor: &Actor,
        case_id: &str,
        reason: Option<String>,
        reunited: bool,
    ) -> Result<()> {
        let oid = ObjectId::parse_str(case_id)?;

        let case = self
            .cases
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| Error::NotFound("case".to_string()))?;

        let actor_case_ids = self
            .users
            .find_one(doc! { "identifier": &actor.id })
            .await?
            .map(|u| u.case_ids)
            .unwrap_or_default();

        can_perform(actor, &actor_case_ids, &case, CaseAction::Close)?;

        if case.status == CaseStatus::Closed {
            return Err(Error::Conflict("case is already closed".to_string()));
        }

        let mut message = format!("Case closed by {}", actor.role);
        if reunited {
            message.push_str(" (reunited)");
        }
        if let Some(reason) = reason.as_deref().filter(|r| !r.is_empty()) {
            message.push_str(": ");
            message.push_str(reason);
        }
        let timeline = TimelineEntry::new("closed", message);
        let timeline_bson = bson::to_bson(&timeline)
            .map_err(|e| Error::Internal(format!("timeline encode: {}", e)))?;

        // Pipeline update: `original_status` snapshots the pre-close
        // status in the same atomic write that closes the case
        let updated = self
            .cases
            .find_one_and_update(
                doc! { "_id": oid, "status": { "$ne": "closed" } },
                vec![doc! { "$set": {
                    "original_status": "$status",
                    "status": "closed",
                    "visible": false,
                    "timelines": { "$concatArrays": ["$timelines", [timeline_bson]] },
                    "metadata.updated_at": DateTime::now(),
                }}],
            )
            .await?;

        let Some(updated) = updated else {
            return Err(Error::Conflict("case is already closed".to_string()));
        };

        info!(case_id, by = %actor.id, reunited, "case closed");

        // Best-effort: the case's vectors leave the similarity index.
        // Failure is logged and never fails the close.
        let vectors = Arc::clone(&self.vectors);
        let namespace = updated.jurisdiction.clone();
        let ids = vec![vector_id(case_id, 0), vector_id(case_id, 1)];
        self.outbox.enqueue(SideEffect::new(
            "close-vector-delete",
            RetryPolicy::SINGLE,
            move || {
                let vectors = Arc::clone(&vectors);
                let namespace = namespace.clone();
                let ids = ids.clone();
                Box::pin(async move { vectors.delete(&namespace, &ids).await })
            },
        ));

        self.enqueue_notification(
            "close-owner-notification",
            updated.owner_id.clone(),
            NewNotification::plain(format!(
                "Your case {} has been closed",
                updated.case_ref_number
            )),
        );

        // Counted at most once per case: this branch only runs when the
        // one-time status transition just happened
        if reunited {
            let stats = self.stats.clone();
            self.outbox.enqueue(SideEffect::new(
                "reunions-counter",
                RetryPolicy::SINGLE,
                move || {
                    let stats = stats.clone();
                    Box::pin(async move { increment_counter(&stats, COUNTER_REUNIONS).await })
                },
            ));
        }

        Ok(())
    }

    fn enqueue_notification(&self, label: &'static str, user_id: String, n: NewNotification) {
        if user_id == ANONYMOUS_OWNER {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        self.outbox.enqueue(SideEffect::new(
            label,
            RetryPolicy::SINGLE,
            move || {
                let notifier = Arc::clone(&notifier);
                let user_id = user_id.clone();
                let n = n.clone();
                Box::pin(async move {
                    notifier.notify(&user_id, n).await;
                    Ok(())
                })
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_fires_on_multiples_of_five() {
        for count in 1..=4 {
            assert!(!crossed_threshold(count), "count {}", count);
        }
        assert!(crossed_threshold(5));
        for count in 6..=9 {
            assert!(!crossed_threshold(count), "count {}", count);
        }
        assert!(crossed_threshold(10));
    }

    #[test]
    fn test_threshold_ignores_zero() {
        assert!(!crossed_threshold(0));
    }
}
