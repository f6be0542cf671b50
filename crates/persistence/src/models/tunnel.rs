use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Document;
use crate::core::Collection;
use crate::tenant::TenantId;

/// An HTTP tunnel exposing a device port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Public address; globally unique.
    pub address: String,
    pub tenant_id: TenantId,
    pub device_uid: String,
    pub host: String,
    pub port: u16,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Tunnel {
    /// Creates a tunnel record.
    pub fn new(
        address: impl Into<String>,
        tenant_id: TenantId,
        device_uid: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            address: address.into(),
            tenant_id,
            device_uid: device_uid.into(),
            host: host.into(),
            port,
            created_at: Utc::now(),
        }
    }
}

impl Document for Tunnel {
    const COLLECTION: Collection = Collection::Tunnels;
}
