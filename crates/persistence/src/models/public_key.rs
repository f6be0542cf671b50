use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Device, Document};
use crate::core::Collection;
use crate::tenant::TenantId;

/// An SSH public key authorised for a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Unique per tenant.
    pub fingerprint: String,
    /// Encoded key material.
    pub data: String,
    pub tenant_id: TenantId,
    pub name: String,
    /// Login the key is restricted to; empty allows any.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub filter: PublicKeyFilter,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Which devices a key applies to: a hostname pattern or a set of tag names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyFilter {
    /// Regular expression matched against device hostnames.
    #[serde(default)]
    pub hostname: String,
    /// Tag names; when non-empty the key applies to devices carrying any of them.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PublicKey {
    /// Creates a key applying to every device.
    pub fn new(
        tenant_id: TenantId,
        fingerprint: impl Into<String>,
        data: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            data: data.into(),
            tenant_id,
            name: name.into(),
            username: String::new(),
            filter: PublicKeyFilter {
                hostname: ".*".to_string(),
                tags: Vec::new(),
            },
            created_at: Utc::now(),
        }
    }

    /// Evaluates the hostname pattern. An empty pattern matches everything and
    /// an invalid one matches nothing.
    pub fn matches_hostname(&self, hostname: &str) -> bool {
        if self.filter.hostname.is_empty() {
            return true;
        }
        match Regex::new(&self.filter.hostname) {
            Ok(re) => re.is_match(hostname),
            Err(e) => {
                tracing::warn!(fingerprint = %self.fingerprint, error = %e, "Invalid hostname filter");
                false
            }
        }
    }

    /// Whether the key applies to a device: by tags when the filter has any,
    /// otherwise by hostname.
    pub fn applies_to(&self, device: &Device) -> bool {
        if self.filter.tags.is_empty() {
            self.matches_hostname(&device.name)
        } else {
            self.filter.tags.iter().any(|t| device.tags.contains(t))
        }
    }
}

impl Document for PublicKey {
    const COLLECTION: Collection = Collection::PublicKeys;
}

/// Partial update of a public key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicKeyChanges {
    pub name: Option<String>,
    pub username: Option<String>,
    pub filter: Option<PublicKeyFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_hostname() {
        let mut key = PublicKey::new(TenantId::new("t"), "fp", "data", "ops");
        assert!(key.matches_hostname("anything"));

        key.filter.hostname = "^web-[0-9]+$".to_string();
        assert!(key.matches_hostname("web-12"));
        assert!(!key.matches_hostname("db-1"));

        key.filter.hostname = "([".to_string();
        assert!(!key.matches_hostname("web-12"));

        key.filter.hostname.clear();
        assert!(key.matches_hostname("db-1"));
    }

    #[test]
    fn test_applies_to_by_tags() {
        let mut key = PublicKey::new(TenantId::new("t"), "fp", "data", "ops");
        key.filter.tags = vec!["prod".to_string()];

        let mut device = Device::new(TenantId::new("t"), "web-1", "aa");
        assert!(!key.applies_to(&device));
        device.tags.push("prod".to_string());
        assert!(key.applies_to(&device));
    }
}
