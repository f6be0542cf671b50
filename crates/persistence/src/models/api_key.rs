use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Document, Role};
use crate::core::Collection;
use crate::tenant::TenantId;

/// A namespace-scoped API key. The raw key is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Hex SHA-256 of the raw key.
    pub id: String,
    /// Unique per tenant.
    pub name: String,
    pub tenant_id: TenantId,
    pub role: Role,
    /// User id of the creator.
    pub created_by: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Expiry as a unix timestamp in seconds; non-positive never expires.
    #[serde(default)]
    pub expires_in: i64,
}

impl ApiKey {
    /// Creates a key record from the raw secret handed to the client.
    pub fn new(
        raw_key: &str,
        tenant_id: TenantId,
        name: impl Into<String>,
        role: Role,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::digest(raw_key),
            name: name.into(),
            tenant_id,
            role,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            expires_in: 0,
        }
    }

    /// Hex SHA-256 of a raw key.
    pub fn digest(raw_key: &str) -> String {
        hex::encode(Sha256::digest(raw_key.as_bytes()))
    }

    /// Returns `true` once the expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_in > 0 && now.timestamp() >= self.expires_in
    }
}

impl Document for ApiKey {
    const COLLECTION: Collection = Collection::ApiKeys;
}

/// Partial update of an API key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiKeyChanges {
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            ApiKey::digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut key = ApiKey::new("k", TenantId::new("t"), "ci", Role::Operator, "u");
        assert!(!key.is_expired(now));
        key.expires_in = now.timestamp() - 1;
        assert!(key.is_expired(now));
    }
}
