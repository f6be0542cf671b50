//! Tenant identifier type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An opaque namespace (tenant) identifier.
///
/// Namespaces are the isolation boundary for devices, sessions, tags and keys.
/// The identifier is generated as a UUID when a namespace is created, but any
/// non-empty string is accepted so fixtures and migrations can use their own.
///
/// # Examples
///
/// ```
/// use fleet_persistence::tenant::TenantId;
///
/// let tenant = TenantId::new("00000000-0000-4000-0000-000000000000");
/// assert_eq!(tenant.as_str(), "00000000-0000-4000-0000-000000000000");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random tenant ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the ID, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let a = TenantId::generate();
        let b = TenantId::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_display_and_debug() {
        let id = TenantId::new("acme");
        assert_eq!(id.to_string(), "acme");
        assert_eq!(format!("{:?}", id), "TenantId(acme)");
    }

    #[test]
    fn test_serde_transparent() {
        let id = TenantId::new("acme");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acme\"");
        let back: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(back, id);
    }
}
