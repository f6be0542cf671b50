//! Named fixtures shipped with the suite.

use fleet_persistence::error::{StorageError, StorageResult};
use fleet_persistence::fixtures::Fixture;

/// Users: john, jane, bob (not confirmed) and alex.
pub const USERS: &str = "users";
/// Namespaces `dev` (owned by john) and `staging` (owned by jane).
pub const NAMESPACES: &str = "namespaces";
/// Two accepted, one pending and one removed device in `dev`; one pending in `staging`.
pub const DEVICES: &str = "devices";
/// Three sessions in `dev`.
pub const SESSIONS: &str = "sessions";
/// The active record of the first session.
pub const ACTIVE_SESSIONS: &str = "active_sessions";
/// Tags `production`, `development` and `owners` in `dev`; `production` in `staging`.
pub const TAGS: &str = "tags";
/// Two tagged public keys in `dev`.
pub const PUBLIC_KEYS: &str = "public_keys";
/// API keys `dev` and `prod` in `dev`.
pub const API_KEYS: &str = "api_keys";
/// Two invitations of alex to `dev`, the later one pending.
pub const MEMBERSHIP_INVITATIONS: &str = "membership_invitations";

const SOURCES: &[(&str, &str)] = &[
    (USERS, include_str!("../fixtures/users.json")),
    (NAMESPACES, include_str!("../fixtures/namespaces.json")),
    (DEVICES, include_str!("../fixtures/devices.json")),
    (SESSIONS, include_str!("../fixtures/sessions.json")),
    (ACTIVE_SESSIONS, include_str!("../fixtures/active_sessions.json")),
    (TAGS, include_str!("../fixtures/tags.json")),
    (PUBLIC_KEYS, include_str!("../fixtures/public_keys.json")),
    (API_KEYS, include_str!("../fixtures/api_keys.json")),
    (
        MEMBERSHIP_INVITATIONS,
        include_str!("../fixtures/membership_invitations.json"),
    ),
];

/// Parses a bundled fixture by name.
pub fn load(name: &str) -> StorageResult<Fixture> {
    let (_, json) = SOURCES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .ok_or_else(|| StorageError::not_found("fixture", name))?;
    Fixture::from_json(name, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_persistence::core::Collection;

    #[test]
    fn test_every_bundled_fixture_parses() {
        for (name, _) in SOURCES {
            let fixture = load(name).unwrap();
            assert_eq!(fixture.collection, Collection::from_name(name).unwrap());
            assert!(!fixture.documents.is_empty(), "{name} is empty");
        }
    }

    #[test]
    fn test_unknown_fixture() {
        assert!(load("nope").unwrap_err().is_not_found());
    }
}
