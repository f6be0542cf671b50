//! Resolver keys: which unique field a lookup-by-value targets.
//!
//! Every resolver field is covered by a unique index in its scope, so a
//! resolve matches at most one document.

use super::stage::Condition;
use crate::models::normalize;

/// Builds the lookup condition for a resolver value.
pub trait Resolver: Copy + std::fmt::Debug {
    /// Document path the key targets.
    fn field(&self) -> &'static str;

    /// Whether values are matched case-insensitively.
    fn case_insensitive(&self) -> bool {
        false
    }

    /// Condition selecting the document with `value`.
    fn condition(&self, value: &str) -> Condition {
        if self.case_insensitive() {
            Condition::eq(self.field(), normalize(value))
        } else {
            Condition::eq(self.field(), value)
        }
    }
}

/// Namespace lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceResolver {
    /// The namespace's tenant id.
    TenantId,
    /// Case-insensitive.
    Name,
}

impl Resolver for NamespaceResolver {
    fn field(&self) -> &'static str {
        match self {
            NamespaceResolver::TenantId => "tenant_id",
            NamespaceResolver::Name => "name",
        }
    }

    fn case_insensitive(&self) -> bool {
        matches!(self, NamespaceResolver::Name)
    }
}

/// Device lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceResolver {
    /// Derived from tenant and MAC; globally unique.
    Uid,
    /// Unique per tenant; combine with a namespace scope.
    Hostname,
    /// `identity.mac`; combine with a namespace scope.
    Mac,
}

impl Resolver for DeviceResolver {
    fn field(&self) -> &'static str {
        match self {
            DeviceResolver::Uid => "uid",
            DeviceResolver::Hostname => "name",
            DeviceResolver::Mac => "identity.mac",
        }
    }
}

/// Session lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResolver {
    /// The session uid.
    Uid,
}

impl Resolver for SessionResolver {
    fn field(&self) -> &'static str {
        "uid"
    }
}

/// User lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserResolver {
    /// The user id.
    Id,
    /// Case-insensitive.
    Email,
    /// Case-insensitive.
    Username,
}

impl Resolver for UserResolver {
    fn field(&self) -> &'static str {
        match self {
            UserResolver::Id => "id",
            UserResolver::Email => "email",
            UserResolver::Username => "username",
        }
    }

    fn case_insensitive(&self) -> bool {
        !matches!(self, UserResolver::Id)
    }
}

/// Tag lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagResolver {
    /// The tag id.
    Id,
    /// Unique per tenant.
    Name,
}

impl Resolver for TagResolver {
    fn field(&self) -> &'static str {
        match self {
            TagResolver::Id => "id",
            TagResolver::Name => "name",
        }
    }
}

/// API key lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyResolver {
    /// The key digest; see [`ApiKey::digest`](crate::models::ApiKey::digest).
    Id,
    /// Unique per tenant.
    Name,
}

impl Resolver for ApiKeyResolver {
    fn field(&self) -> &'static str {
        match self {
            ApiKeyResolver::Id => "id",
            ApiKeyResolver::Name => "name",
        }
    }
}

/// Public key lookup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyResolver {
    /// Unique per tenant.
    Fingerprint,
}

impl Resolver for PublicKeyResolver {
    fn field(&self) -> &'static str {
        "fingerprint"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_keys_normalise() {
        assert_eq!(
            UserResolver::Email.condition("John@Example.com"),
            Condition::eq("email", "john@example.com")
        );
        assert_eq!(
            NamespaceResolver::Name.condition("Dev-Team"),
            Condition::eq("name", "dev-team")
        );
        assert_eq!(UserResolver::Id.condition("ABC"), Condition::eq("id", "ABC"));
    }

    #[test]
    fn test_nested_field() {
        assert_eq!(
            DeviceResolver::Mac.condition("aa:bb"),
            Condition::eq("identity.mac", "aa:bb")
        );
    }
}
