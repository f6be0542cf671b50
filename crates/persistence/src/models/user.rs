use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Document, Namespace};
use crate::core::Collection;

/// An account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Globally unique, stored lowercase. Empty for invited users.
    #[serde(default)]
    pub username: String,
    /// Globally unique, stored lowercase.
    pub email: String,
    /// Opaque password digest produced by the service layer.
    #[serde(default)]
    pub password_digest: String,
    pub status: UserStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferences: UserPreferences,
    /// Namespace ownership quota; negative means unlimited.
    #[serde(default = "unlimited")]
    pub max_namespaces: i64,
}

fn unlimited() -> i64 {
    -1
}

impl User {
    /// Creates a confirmed user.
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        password_digest: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            username: username.into(),
            email: email.into(),
            password_digest: password_digest.into(),
            status: UserStatus::Confirmed,
            created_at: Utc::now(),
            last_login: None,
            preferences: UserPreferences::default(),
            max_namespaces: unlimited(),
        }
    }
}

impl Document for User {
    const COLLECTION: Collection = Collection::Users;
}

/// Account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserStatus {
    Invited,
    NotConfirmed,
    Confirmed,
}

/// User-level preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Tenant id of the namespace to open by default; empty when unset.
    #[serde(default)]
    pub preferred_namespace: String,
}

/// Namespaces a user owns or belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    pub owned_namespaces: Vec<Namespace>,
    pub associated_namespaces: Vec<Namespace>,
}

/// Partial update of a user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserChanges {
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_digest: Option<String>,
    pub status: Option<UserStatus>,
    pub last_login: Option<DateTime<Utc>>,
    pub preferred_namespace: Option<String>,
    pub max_namespaces: Option<i64>,
}
