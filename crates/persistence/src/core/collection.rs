//! Document collections and their declared constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A uniqueness constraint on one field, optionally scoped by another.
///
/// Documents whose scope or field is missing, null or an empty string do not
/// participate in the constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueIndex {
    /// Scoping field, e.g. `tenant_id` for per-tenant names.
    pub scope: Option<&'static str>,
    /// The unique field; reported on violations.
    pub field: &'static str,
}

impl UniqueIndex {
    const fn global(field: &'static str) -> Self {
        Self { scope: None, field }
    }

    const fn scoped(scope: &'static str, field: &'static str) -> Self {
        Self {
            scope: Some(scope),
            field,
        }
    }

    /// Fields covered by the index, scope first.
    pub fn fields(&self) -> Vec<&'static str> {
        self.scope.into_iter().chain([self.field]).collect()
    }

    /// Stable index name for engines that materialise it.
    pub fn name(&self, collection: Collection) -> String {
        format!("uq_{}_{}", collection.name(), self.fields().join("_"))
    }
}

/// A named set of documents.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Namespaces,
    Devices,
    Sessions,
    SessionsEvents,
    ActiveSessions,
    Users,
    Tags,
    ApiKeys,
    PublicKeys,
    PrivateKeys,
    MembershipInvitations,
    System,
    Tunnels,
}

impl Collection {
    /// Every collection.
    pub const ALL: [Collection; 13] = [
        Collection::Namespaces,
        Collection::Devices,
        Collection::Sessions,
        Collection::SessionsEvents,
        Collection::ActiveSessions,
        Collection::Users,
        Collection::Tags,
        Collection::ApiKeys,
        Collection::PublicKeys,
        Collection::PrivateKeys,
        Collection::MembershipInvitations,
        Collection::System,
        Collection::Tunnels,
    ];

    /// Collection name as stored.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Namespaces => "namespaces",
            Collection::Devices => "devices",
            Collection::Sessions => "sessions",
            Collection::SessionsEvents => "sessions_events",
            Collection::ActiveSessions => "active_sessions",
            Collection::Users => "users",
            Collection::Tags => "tags",
            Collection::ApiKeys => "api_keys",
            Collection::PublicKeys => "public_keys",
            Collection::PrivateKeys => "private_keys",
            Collection::MembershipInvitations => "membership_invitations",
            Collection::System => "system",
            Collection::Tunnels => "tunnels",
        }
    }

    /// Looks a collection up by its stored name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Singular entity name used in errors.
    pub fn entity(&self) -> &'static str {
        match self {
            Collection::Namespaces => "namespace",
            Collection::Devices => "device",
            Collection::Sessions => "session",
            Collection::SessionsEvents => "session event",
            Collection::ActiveSessions => "active session",
            Collection::Users => "user",
            Collection::Tags => "tag",
            Collection::ApiKeys => "api key",
            Collection::PublicKeys => "public key",
            Collection::PrivateKeys => "private key",
            Collection::MembershipInvitations => "membership invitation",
            Collection::System => "system",
            Collection::Tunnels => "tunnel",
        }
    }

    /// Primary-key field, if documents have one.
    pub fn key_field(&self) -> Option<&'static str> {
        match self {
            Collection::Namespaces => Some("tenant_id"),
            Collection::Devices | Collection::Sessions | Collection::ActiveSessions => Some("uid"),
            Collection::SessionsEvents => Some("session"),
            Collection::Users
            | Collection::Tags
            | Collection::ApiKeys
            | Collection::MembershipInvitations => Some("id"),
            Collection::PublicKeys | Collection::PrivateKeys => Some("fingerprint"),
            Collection::Tunnels => Some("address"),
            Collection::System => None,
        }
    }

    /// Field holding the owning tenant, if the collection is tenant-owned.
    ///
    /// Namespaces are keyed by `tenant_id` but are not owned by one: a
    /// request context never narrows them implicitly.
    pub fn tenant_field(&self) -> Option<&'static str> {
        match self {
            Collection::Devices
            | Collection::Sessions
            | Collection::SessionsEvents
            | Collection::ActiveSessions
            | Collection::Tags
            | Collection::ApiKeys
            | Collection::PublicKeys
            | Collection::MembershipInvitations
            | Collection::Tunnels => Some("tenant_id"),
            Collection::Namespaces
            | Collection::Users
            | Collection::PrivateKeys
            | Collection::System => None,
        }
    }

    /// Declared uniqueness constraints.
    pub fn unique_indexes(&self) -> &'static [UniqueIndex] {
        const NAMESPACES: &[UniqueIndex] =
            &[UniqueIndex::global("tenant_id"), UniqueIndex::global("name")];
        const DEVICES: &[UniqueIndex] =
            &[UniqueIndex::global("uid"), UniqueIndex::scoped("tenant_id", "name")];
        const UID: &[UniqueIndex] = &[UniqueIndex::global("uid")];
        const USERS: &[UniqueIndex] = &[
            UniqueIndex::global("id"),
            UniqueIndex::global("username"),
            UniqueIndex::global("email"),
        ];
        const TENANT_NAMED: &[UniqueIndex] =
            &[UniqueIndex::global("id"), UniqueIndex::scoped("tenant_id", "name")];
        const PUBLIC_KEYS: &[UniqueIndex] = &[UniqueIndex::scoped("tenant_id", "fingerprint")];
        const FINGERPRINT: &[UniqueIndex] = &[UniqueIndex::global("fingerprint")];
        const ID: &[UniqueIndex] = &[UniqueIndex::global("id")];
        const ADDRESS: &[UniqueIndex] = &[UniqueIndex::global("address")];

        match self {
            Collection::Namespaces => NAMESPACES,
            Collection::Devices => DEVICES,
            Collection::Sessions | Collection::ActiveSessions => UID,
            Collection::Users => USERS,
            Collection::Tags | Collection::ApiKeys => TENANT_NAMED,
            Collection::PublicKeys => PUBLIC_KEYS,
            Collection::PrivateKeys => FINGERPRINT,
            Collection::MembershipInvitations => ID,
            Collection::Tunnels => ADDRESS,
            Collection::SessionsEvents | Collection::System => &[],
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_name(collection.name()), Some(collection));
        }
        assert_eq!(Collection::from_name("nope"), None);
    }

    #[test]
    fn test_index_names() {
        let index = Collection::Devices.unique_indexes()[1];
        assert_eq!(index.fields(), vec!["tenant_id", "name"]);
        assert_eq!(index.name(Collection::Devices), "uq_devices_tenant_id_name");
    }

    #[test]
    fn test_namespaces_are_not_tenant_owned() {
        assert_eq!(Collection::Namespaces.tenant_field(), None);
        assert_eq!(Collection::Tags.tenant_field(), Some("tenant_id"));
    }
}
