use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Document;
use crate::core::Collection;
use crate::tenant::TenantId;

/// A device is considered online while it heartbeats within this window.
pub const ONLINE_WINDOW_SECS: i64 = 120;

/// An enrolled machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Derived from the tenant and hardware identity; see [`Device::derive_uid`].
    #[serde(default)]
    pub uid: String,
    /// Hostname, unique per tenant.
    pub name: String,
    pub identity: DeviceIdentity,
    #[serde(default)]
    pub info: Option<DeviceInfo>,
    #[serde(default)]
    pub public_key: String,
    pub tenant_id: TenantId,
    pub status: DeviceStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub status_updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_addr: String,
    /// Tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the device may be accepted; computed at list time.
    #[serde(default)]
    pub acceptable: bool,
}

impl Device {
    /// Creates a pending device for a hardware identity.
    pub fn new(tenant_id: TenantId, name: impl Into<String>, mac: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: String::new(),
            name: name.into(),
            identity: DeviceIdentity { mac: mac.into() },
            info: None,
            public_key: String::new(),
            tenant_id,
            status: DeviceStatus::Pending,
            status_updated_at: now,
            created_at: now,
            last_seen: now,
            disconnected_at: None,
            remote_addr: String::new(),
            tags: Vec::new(),
            acceptable: false,
        }
    }

    /// Content-derived identifier: hex SHA-256 of the tenant id followed by
    /// the MAC address. Stable across re-registration of the same hardware.
    pub fn derive_uid(tenant_id: &TenantId, mac: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.as_str().as_bytes());
        hasher.update(mac.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Online while connected and seen recently.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        self.disconnected_at.is_none()
            && now.signed_duration_since(self.last_seen) < Duration::seconds(ONLINE_WINDOW_SECS)
    }
}

impl Document for Device {
    const COLLECTION: Collection = Collection::Devices;
    const TRANSIENT: &'static [&'static str] = &["acceptable"];
}

/// Hardware fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub mac: String,
}

/// Agent-reported platform details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pretty_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub platform: String,
}

/// Enrollment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Accepted,
    Rejected,
    Removed,
}

impl DeviceStatus {
    /// Every status.
    pub const ALL: [DeviceStatus; 4] = [
        DeviceStatus::Pending,
        DeviceStatus::Accepted,
        DeviceStatus::Rejected,
        DeviceStatus::Removed,
    ];

    /// Stored token.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Accepted => "accepted",
            DeviceStatus::Rejected => "rejected",
            DeviceStatus::Removed => "removed",
        }
    }

    /// Name of the namespace counter tracking this status.
    pub fn counter_field(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "devices_pending_count",
            DeviceStatus::Accepted => "devices_accepted_count",
            DeviceStatus::Rejected => "devices_rejected_count",
            DeviceStatus::Removed => "devices_removed_count",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown device status '{}'", s))
    }
}

/// Partial update of a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceChanges {
    pub name: Option<String>,
    pub info: Option<DeviceInfo>,
    pub public_key: Option<String>,
    pub remote_addr: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// `Some(None)` clears the disconnection time.
    pub disconnected_at: Option<Option<DateTime<Utc>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_uid_is_stable_and_tenant_bound() {
        let a = Device::derive_uid(&TenantId::new("t1"), "aa:bb");
        let b = Device::derive_uid(&TenantId::new("t1"), "aa:bb");
        let c = Device::derive_uid(&TenantId::new("t2"), "aa:bb");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_status_parse_and_counter() {
        assert_eq!("accepted".parse::<DeviceStatus>(), Ok(DeviceStatus::Accepted));
        assert!("online".parse::<DeviceStatus>().is_err());
        assert_eq!(DeviceStatus::Removed.counter_field(), "devices_removed_count");
    }

    #[test]
    fn test_document_strips_acceptable() {
        let mut device = Device::new(TenantId::new("t1"), "web", "aa:bb");
        device.acceptable = true;
        let doc = device.to_document().unwrap();
        assert!(doc.get("acceptable").is_none());
        assert!(doc["created_at"].is_i64());
    }

    #[test]
    fn test_is_online() {
        let now = Utc::now();
        let mut device = Device::new(TenantId::new("t1"), "web", "aa:bb");
        device.last_seen = now - Duration::seconds(10);
        assert!(device.is_online(now));
        device.disconnected_at = Some(now);
        assert!(!device.is_online(now));
    }
}
