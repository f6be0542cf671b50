use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Document, Role};
use crate::core::Collection;
use crate::tenant::TenantId;

/// An invitation for a user to join a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipInvitation {
    #[serde(default)]
    pub id: String,
    pub tenant_id: TenantId,
    pub user_id: String,
    pub invited_by: String,
    pub role: Role,
    pub status: InvitationStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub status_updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    /// How many times the invitation has been sent.
    #[serde(default)]
    pub invitations: i64,
}

impl MembershipInvitation {
    /// Creates a pending invitation.
    pub fn new(
        tenant_id: TenantId,
        user_id: impl Into<String>,
        invited_by: impl Into<String>,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            tenant_id,
            user_id: user_id.into(),
            invited_by: invited_by.into(),
            role,
            status: InvitationStatus::Pending,
            created_at: now,
            updated_at: now,
            status_updated_at: now,
            expires_at: None,
            invitations: 1,
        }
    }

    /// Returns `true` once the expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl Document for MembershipInvitation {
    const COLLECTION: Collection = Collection::MembershipInvitations;
}

/// Invitation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

/// Partial update of an invitation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipInvitationChanges {
    pub role: Option<Role>,
    pub status: Option<InvitationStatus>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Bumps the send counter by one.
    pub resend: bool,
}
