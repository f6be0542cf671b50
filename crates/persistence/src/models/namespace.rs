use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceStatus, Document};
use crate::core::Collection;
use crate::tenant::TenantId;

/// A tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// Globally unique, stored lowercase.
    pub name: String,
    /// User id of the owner.
    pub owner: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub settings: NamespaceSettings,
    /// Device quota; negative means unlimited.
    #[serde(default = "unlimited")]
    pub max_devices: i64,
    #[serde(default)]
    pub devices_pending_count: i64,
    #[serde(default)]
    pub devices_accepted_count: i64,
    #[serde(default)]
    pub devices_rejected_count: i64,
    #[serde(default)]
    pub devices_removed_count: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

fn unlimited() -> i64 {
    -1
}

impl Namespace {
    /// Creates a namespace owned by `owner`, with no members yet.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            tenant_id: TenantId::new(""),
            members: Vec::new(),
            settings: NamespaceSettings::default(),
            max_devices: unlimited(),
            devices_pending_count: 0,
            devices_accepted_count: 0,
            devices_rejected_count: 0,
            devices_removed_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Counter for devices in `status`.
    pub fn device_count(&self, status: DeviceStatus) -> i64 {
        match status {
            DeviceStatus::Pending => self.devices_pending_count,
            DeviceStatus::Accepted => self.devices_accepted_count,
            DeviceStatus::Rejected => self.devices_rejected_count,
            DeviceStatus::Removed => self.devices_removed_count,
        }
    }

    /// Looks a member up by user id.
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == user_id)
    }

    /// Returns `true` once the accepted-device quota is reached.
    pub fn has_reached_device_limit(&self) -> bool {
        self.max_devices >= 0 && self.devices_accepted_count >= self.max_devices
    }
}

impl Document for Namespace {
    const COLLECTION: Collection = Collection::Namespaces;
    const TRANSIENT: &'static [&'static str] = &["members.email", "members.username"];
}

/// Per-namespace settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSettings {
    #[serde(default)]
    pub session_record: bool,
    #[serde(default)]
    pub connection_announcement: String,
}

/// A user's membership in a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// User id.
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    /// Filled by the members-data enrichment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Filled by the members-data enrichment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl Member {
    /// Creates an accepted member.
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            status: MemberStatus::Accepted,
            added_at: Utc::now(),
            email: String::new(),
            username: String::new(),
        }
    }
}

/// Membership role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Administrator,
    Operator,
    Observer,
}

/// Membership status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Accepted,
    Pending,
}

/// Partial update of a namespace. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceChanges {
    pub name: Option<String>,
    pub max_devices: Option<i64>,
    pub session_record: Option<bool>,
    pub connection_announcement: Option<String>,
}

/// Partial update of a membership.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberChanges {
    pub role: Option<Role>,
    pub status: Option<MemberStatus>,
}
