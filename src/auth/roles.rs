//! Roles and case-action authorization
//!
//! All role- and ownership-based guards funnel through [`can_perform`]
//! instead of per-endpoint role-string comparisons. Failures are opaque
//! to the caller; the denial reason only reaches the logs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::jwt::Actor;
use crate::db::schemas::CaseDoc;
use crate::types::{Error, Result};

/// User roles. Police and volunteers are the elevated roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Police,
    Volunteer,
    #[default]
    #[serde(other)]
    General,
}

impl Role {
    /// Parse a role string from the identity provider. Unrecognized roles
    /// degrade to `General`.
    pub fn parse(role: &str) -> Role {
        match role {
            "police" => Role::Police,
            "volunteer" => Role::Volunteer,
            _ => Role::General,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Police | Role::Volunteer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::General => "general",
            Role::Police => "police",
            Role::Volunteer => "volunteer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guarded case operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseAction {
    /// Raise a flag against a case. Requester-level; owners cannot flag
    /// their own case.
    Flag,
    /// Hand a case to another user. Elevated roles only.
    Assign,
    /// Close a case. Listed-owner only: the case id must appear in the
    /// actor's own case list, not merely match the stored owner field.
    Close,
    /// Skip the same-person verification during registration. Elevated
    /// roles only.
    BypassVerification,
}

/// Decide whether `actor` may perform `action` on `case`.
///
/// `actor_case_ids` is the actor's own case list, needed for the
/// listed-owner check on `Close`.
pub fn can_perform(
    actor: &Actor,
    actor_case_ids: &[String],
    case: &CaseDoc,
    action: CaseAction,
) -> Result<()> {
    match action {
        CaseAction::Flag => {
            if case.owner_id == actor.id {
                return Err(Error::unauthorized(format!(
                    "owner {} cannot flag their own case",
                    actor.id
                )));
            }
            Ok(())
        }
        CaseAction::Assign | CaseAction::BypassVerification => {
            if !actor.role.is_elevated() {
                return Err(Error::unauthorized(format!(
                    "{} requires an elevated role, actor {} is {}",
                    action_name(action),
                    actor.id,
                    actor.role
                )));
            }
            Ok(())
        }
        CaseAction::Close => {
            let case_id = case
                .hex_id()
                .ok_or_else(|| Error::Internal("case without id".to_string()))?;
            if !actor_case_ids.iter().any(|id| id == &case_id) {
                return Err(Error::unauthorized(format!(
                    "case {} is not in the case list of actor {}",
                    case_id, actor.id
                )));
            }
            Ok(())
        }
    }
}

fn action_name(action: CaseAction) -> &'static str {
    match action {
        CaseAction::Flag => "flag",
        CaseAction::Assign => "assign",
        CaseAction::Close => "close",
        CaseAction::BypassVerification => "verification bypass",
    }
}

impl CaseDoc {
    /// Hex id of this document, if persisted
    pub fn hex_id(&self) -> Option<String> {
        self._id.map(|id| id.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    fn actor(id: &str, role: Role) -> Actor {
        Actor {
            id: id.to_string(),
            role,
        }
    }

    fn case_owned_by(owner: &str) -> CaseDoc {
        CaseDoc {
            _id: Some(ObjectId::new()),
            owner_id: owner.to_string(),
            ..CaseDoc::default()
        }
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("police"), Role::Police);
        assert_eq!(Role::parse("volunteer"), Role::Volunteer);
        assert_eq!(Role::parse("general"), Role::General);
        assert_eq!(Role::parse("superuser"), Role::General);
    }

    #[test]
    fn test_elevated_roles() {
        assert!(Role::Police.is_elevated());
        assert!(Role::Volunteer.is_elevated());
        assert!(!Role::General.is_elevated());
    }

    #[test]
    fn test_owner_cannot_flag_own_case() {
        let case = case_owned_by("sam");
        let result = can_perform(&actor("sam", Role::General), &[], &case, CaseAction::Flag);
        assert!(result.is_err());

        let result = can_perform(&actor("lee", Role::General), &[], &case, CaseAction::Flag);
        assert!(result.is_ok());
    }

    #[test]
    fn test_assign_requires_elevated_role() {
        let case = case_owned_by("sam");
        assert!(can_perform(&actor("lee", Role::General), &[], &case, CaseAction::Assign).is_err());
        assert!(can_perform(&actor("lee", Role::Police), &[], &case, CaseAction::Assign).is_ok());
        assert!(
            can_perform(&actor("lee", Role::Volunteer), &[], &case, CaseAction::Assign).is_ok()
        );
    }

    #[test]
    fn test_bypass_requires_elevated_role() {
        let case = case_owned_by("sam");
        assert!(can_perform(
            &actor("lee", Role::General),
            &[],
            &case,
            CaseAction::BypassVerification
        )
        .is_err());
        assert!(can_perform(
            &actor("lee", Role::Police),
            &[],
            &case,
            CaseAction::BypassVerification
        )
        .is_ok());
    }

    #[test]
    fn test_close_requires_listed_ownership() {
        let case = case_owned_by("sam");
        let case_id = case.hex_id().unwrap();

        // Matching the stored owner field is not enough
        let result = can_perform(&actor("sam", Role::General), &[], &case, CaseAction::Close);
        assert!(result.is_err());

        // The case id must be in the actor's own list
        let listed = vec![case_id];
        let result = can_perform(&actor("sam", Role::General), &listed, &case, CaseAction::Close);
        assert!(result.is_ok());
    }
}
