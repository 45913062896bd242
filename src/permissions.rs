//! Boundary to the external permission engine.
//!
//! Policy evaluation lives outside this crate; the dispatcher only needs a
//! yes/no answer for "may this member read this entity".

use serde::{Deserialize, Serialize};

/// A user's membership in one context (organization, project, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub context_type: String,
    pub context_id: String,
    pub organization_id: Option<String>,
    pub role: String,
}

impl Membership {
    pub fn organization(organization_id: impl Into<String>, role: impl Into<String>) -> Self {
        let organization_id = organization_id.into();
        Self {
            context_type: "organization".to_string(),
            context_id: organization_id.clone(),
            organization_id: Some(organization_id),
            role: role.into(),
        }
    }
}

/// System-wide role of a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemRole {
    #[default]
    User,
    Admin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Read,
    Update,
    Delete,
}

/// The entity a permission check is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermissionSubject<'a> {
    pub id: &'a str,
    pub entity_type: &'a str,
    pub organization_id: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
}

impl PermissionDecision {
    pub const ALLOW: Self = Self { allowed: true };
    pub const DENY: Self = Self { allowed: false };
}

/// Black-box permission predicate.
pub trait PermissionEngine: Send + Sync {
    fn is_allowed(
        &self,
        memberships: &[Membership],
        action: PermissionAction,
        subject: &PermissionSubject<'_>,
    ) -> PermissionDecision;
}

impl<F> PermissionEngine for F
where
    F: Fn(&[Membership], PermissionAction, &PermissionSubject<'_>) -> bool + Send + Sync,
{
    fn is_allowed(
        &self,
        memberships: &[Membership],
        action: PermissionAction,
        subject: &PermissionSubject<'_>,
    ) -> PermissionDecision {
        PermissionDecision {
            allowed: self(memberships, action, subject),
        }
    }
}

/// Grants read access to any member of the subject's organization.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrganizationMembers;

impl PermissionEngine for OrganizationMembers {
    fn is_allowed(
        &self,
        memberships: &[Membership],
        action: PermissionAction,
        subject: &PermissionSubject<'_>,
    ) -> PermissionDecision {
        let member = memberships
            .iter()
            .any(|m| m.organization_id.as_deref() == Some(subject.organization_id));
        PermissionDecision {
            allowed: member && action == PermissionAction::Read,
        }
    }
}
