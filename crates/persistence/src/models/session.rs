use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Device, Document};
use crate::core::Collection;
use crate::tenant::TenantId;

/// A remote shell session on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    /// Weak reference to the device.
    pub device_uid: String,
    pub tenant_id: TenantId,
    pub username: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub recorded: bool,
    /// `shell`, `exec`, ...
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub term: String,
    /// Distinct event types and seats seen so far.
    #[serde(default)]
    pub events: SessionEventSets,
    /// Set by the session-activity enrichment.
    #[serde(default)]
    pub active: bool,
    /// Set by the session-device enrichment.
    #[serde(default)]
    pub device: Option<Device>,
}

impl Session {
    /// Creates an open session.
    pub fn new(
        uid: impl Into<String>,
        tenant_id: TenantId,
        device_uid: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.into(),
            device_uid: device_uid.into(),
            tenant_id,
            username: username.into(),
            ip_address: String::new(),
            started_at: now,
            last_seen: now,
            closed: false,
            authenticated: false,
            recorded: false,
            kind: "shell".to_string(),
            term: String::new(),
            events: SessionEventSets::default(),
            active: false,
            device: None,
        }
    }
}

impl Document for Session {
    const COLLECTION: Collection = Collection::Sessions;
    const TRANSIENT: &'static [&'static str] = &["active", "device"];
}

/// Sets of event types and seats recorded for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEventSets {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub seats: Vec<i64>,
}

/// One recorded event of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Owning session uid.
    pub session: String,
    #[serde(default)]
    pub tenant_id: TenantId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub seat: i64,
}

impl Document for SessionEvent {
    const COLLECTION: Collection = Collection::SessionsEvents;
}

/// Liveness record for an open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub uid: String,
    pub tenant_id: TenantId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
}

impl Document for ActiveSession {
    const COLLECTION: Collection = Collection::ActiveSessions;
}

/// Partial update of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionChanges {
    pub authenticated: Option<bool>,
    pub recorded: Option<bool>,
    pub closed: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub term: Option<String>,
}
