//! Sparse-probe conflict detection.
//!
//! A probe lists candidate values for an entity's unique fields. Empty fields
//! are ignored; populated ones are checked against existing documents other
//! than the probe's own.

use serde_json::Value;

use super::stage::{Condition, Stage, path_segments};
use crate::core::{Collection, Executor};
use crate::error::StorageResult;
use crate::models::normalize;

/// A sparse candidate for uniqueness checks.
pub trait ConflictProbe {
    /// Collection searched for collisions.
    const COLLECTION: Collection;

    /// Populated fields, in the order they are reported.
    fn fields(&self) -> Vec<(&'static str, Value)>;

    /// Identifier of the document being checked, excluded from the search.
    fn self_key(&self) -> Option<&str> {
        None
    }
}

/// Outcome of a conflict check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conflicts {
    /// Colliding field names, in probe order.
    pub fields: Vec<String>,
}

impl Conflicts {
    /// Returns `true` when any field collides.
    pub fn has_conflicts(&self) -> bool {
        !self.fields.is_empty()
    }

    /// The `(fields, has_conflicts)` pair.
    pub fn into_parts(self) -> (Vec<String>, bool) {
        let has = self.has_conflicts();
        (self.fields, has)
    }
}

/// Checks a probe with a single engine query.
///
/// `scope` narrows the search population first (e.g. to one tenant). An
/// empty probe never touches the engine.
pub fn detect_conflicts<P: ConflictProbe>(
    exec: &mut dyn Executor,
    scope: Option<Condition>,
    probe: &P,
) -> StorageResult<Conflicts> {
    let fields = probe.fields();
    if fields.is_empty() {
        return Ok(Conflicts::default());
    }

    let any_field = Condition::Or(
        fields
            .iter()
            .map(|(name, value)| Condition::eq(*name, value.clone()))
            .collect(),
    );
    let mut parts: Vec<Condition> = scope.into_iter().collect();
    parts.push(any_field);
    if let (Some(key), Some(key_field)) = (probe.self_key(), P::COLLECTION.key_field()) {
        if !key.is_empty() {
            parts.push(Condition::ne(key_field, key));
        }
    }

    let existing = exec.find(P::COLLECTION, &[Stage::Match(Condition::all(parts))])?;

    let colliding = fields
        .into_iter()
        .filter(|(name, value)| existing.iter().any(|doc| lookup(doc, name) == Some(value)))
        .map(|(name, _)| name.to_string())
        .collect();

    Ok(Conflicts { fields: colliding })
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path_segments(path).try_fold(doc, |current, segment| current.get(segment))
}

fn text(field: &'static str, value: &str, out: &mut Vec<(&'static str, Value)>) {
    if !value.is_empty() {
        out.push((field, Value::String(value.to_string())));
    }
}

/// Namespace probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceConflicts {
    /// Excluded from the search when set.
    pub tenant_id: Option<String>,
    /// Compared case-insensitively.
    pub name: String,
}

impl ConflictProbe for NamespaceConflicts {
    const COLLECTION: Collection = Collection::Namespaces;

    fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        text("name", &normalize(&self.name), &mut out);
        out
    }

    fn self_key(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// User probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConflicts {
    /// Excluded from the search when set.
    pub id: Option<String>,
    /// Compared case-insensitively.
    pub email: String,
    /// Compared case-insensitively.
    pub username: String,
}

impl ConflictProbe for UserConflicts {
    const COLLECTION: Collection = Collection::Users;

    fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        text("email", &normalize(&self.email), &mut out);
        text("username", &normalize(&self.username), &mut out);
        out
    }

    fn self_key(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Device probe; checked within the caller's tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConflicts {
    /// Excluded from the search when set.
    pub uid: Option<String>,
    /// Device name; empty to skip.
    pub name: String,
}

impl ConflictProbe for DeviceConflicts {
    const COLLECTION: Collection = Collection::Devices;

    fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        text("name", &self.name, &mut out);
        out
    }

    fn self_key(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}

/// Tag probe; checked within the caller's tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagConflicts {
    /// Excluded from the search when set.
    pub id: Option<String>,
    /// Tag name; empty to skip.
    pub name: String,
}

impl ConflictProbe for TagConflicts {
    const COLLECTION: Collection = Collection::Tags;

    fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        text("name", &self.name, &mut out);
        out
    }

    fn self_key(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// API key probe; checked within the caller's tenant.
///
/// Unlike the other probes the id is a checked field: two keys with the same
/// digest collide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeyConflicts {
    /// Key digest; empty to skip.
    pub id: String,
    /// Key name; empty to skip.
    pub name: String,
}

impl ConflictProbe for ApiKeyConflicts {
    const COLLECTION: Collection = Collection::ApiKeys;

    fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        text("id", &self.id, &mut out);
        text("name", &self.name, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_fields_are_ignored() {
        assert!(UserConflicts::default().fields().is_empty());
        let probe = UserConflicts {
            id: None,
            email: "A@B.C".into(),
            username: String::new(),
        };
        assert_eq!(probe.fields(), vec![("email", json!("a@b.c"))]);
    }

    #[test]
    fn test_lookup_nested() {
        let doc = json!({"identity": {"mac": "aa"}});
        assert_eq!(lookup(&doc, "identity.mac"), Some(&json!("aa")));
        assert_eq!(lookup(&doc, "identity.ip"), None);
    }

    #[test]
    fn test_conflicts_into_parts() {
        let conflicts = Conflicts {
            fields: vec!["name".into()],
        };
        assert_eq!(conflicts.into_parts(), (vec!["name".to_string()], true));
        assert_eq!(Conflicts::default().into_parts(), (vec![], false));
    }
}
