//! Entity models.
//!
//! Every model maps to one [`Collection`] through [`Document`]. Timestamps are
//! stored as epoch milliseconds so engines can compare them numerically.
//! Fields computed at read time (enrichments) are listed in
//! [`Document::TRANSIENT`] and stripped before a model is written.

// Model fields are named after their stored document keys
#![allow(missing_docs)]

mod api_key;
mod device;
mod invitation;
mod namespace;
mod private_key;
mod public_key;
mod session;
mod system;
mod tag;
mod tunnel;
mod user;

pub use api_key::{ApiKey, ApiKeyChanges};
pub use device::{Device, DeviceChanges, DeviceIdentity, DeviceInfo, DeviceStatus};
pub use invitation::{InvitationStatus, MembershipInvitation, MembershipInvitationChanges};
pub use namespace::{
    Member, MemberChanges, MemberStatus, Namespace, NamespaceChanges, NamespaceSettings, Role,
};
pub use private_key::PrivateKey;
pub use public_key::{PublicKey, PublicKeyChanges, PublicKeyFilter};
pub use session::{ActiveSession, Session, SessionChanges, SessionEvent, SessionEventSets};
pub use system::{System, SystemAuthentication};
pub use tag::{Tag, TagTarget};
pub use tunnel::Tunnel;
pub use user::{User, UserChanges, UserInfo, UserPreferences, UserStatus};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::Collection;
use crate::error::StorageResult;

/// A model stored as a JSON document in one collection.
pub trait Document: Serialize + DeserializeOwned + Send + 'static {
    /// Home collection.
    const COLLECTION: Collection;

    /// Dotted paths computed at read time and never persisted. A path that
    /// crosses an array applies to every element.
    const TRANSIENT: &'static [&'static str] = &[];

    /// Serializes the model for storage.
    fn to_document(&self) -> StorageResult<Value> {
        let mut value = serde_json::to_value(self)?;
        for path in Self::TRANSIENT {
            let segments: Vec<&str> = path.split('.').collect();
            strip_path(&mut value, &segments);
        }
        Ok(value)
    }

    /// Deserializes a stored document.
    fn from_document(value: Value) -> StorageResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

fn strip_path(value: &mut Value, segments: &[&str]) {
    match value {
        Value::Array(items) => {
            for item in items {
                strip_path(item, segments);
            }
        }
        Value::Object(map) => match segments {
            [] => {}
            [last] => {
                map.remove(*last);
            }
            [head, rest @ ..] => {
                if let Some(child) = map.get_mut(*head) {
                    strip_path(child, rest);
                }
            }
        },
        _ => {}
    }
}

/// Lowercases identifiers that are unique case-insensitively.
pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_path_through_arrays() {
        let mut value = json!({
            "members": [
                {"id": "1", "email": "a@b.c"},
                {"id": "2", "email": "d@e.f", "username": "d"}
            ],
            "name": "ns"
        });
        strip_path(&mut value, &["members", "email"]);
        strip_path(&mut value, &["members", "username"]);
        assert_eq!(
            value,
            json!({"members": [{"id": "1"}, {"id": "2"}], "name": "ns"})
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  John.Doe@Example.COM "), "john.doe@example.com");
    }
}
