//! In-process evaluation of conditions, updates and sort keys.
//!
//! The memory engine evaluates everything here. The SQLite engine compiles
//! conditions to SQL but applies updates through [`apply_update`], so both
//! engines share one mutation semantics. Ordering follows SQLite's
//! `ORDER BY json_extract(..)`: null, then numbers (booleans as 0/1), then
//! text, with arrays and objects compared as their JSON text.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::core::{UniqueIndex, Update, UpdateOp};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::query::{Condition, Predicate, path_segments};

/// Resolves a dotted path through nested objects.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path_segments(path).try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

/// Evaluates a condition against a document.
pub fn matches(doc: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::And(parts) => parts.iter().all(|c| matches(doc, c)),
        Condition::Or(parts) => parts.iter().any(|c| matches(doc, c)),
        Condition::Not(inner) => !matches(doc, inner),
        Condition::Field(path, predicate) => field_matches(lookup(doc, path), predicate),
        Condition::ElemMatch(path, inner) => match lookup(doc, path) {
            Some(Value::Array(items)) => items
                .iter()
                .any(|item| item.is_object() && matches(item, inner)),
            _ => false,
        },
    }
}

fn field_matches(value: Option<&Value>, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq(Value::Null) => match value {
            None | Some(Value::Null) => true,
            Some(Value::Array(items)) => items.iter().any(Value::is_null),
            _ => false,
        },
        Predicate::Eq(expected @ (Value::Array(_) | Value::Object(_))) => {
            value.is_some_and(|v| json_eq(v, expected))
        }
        Predicate::Eq(expected) => candidates(value).any(|c| scalar_eq(c, expected)),
        Predicate::ContainsText(needle) => {
            let needle = needle.to_ascii_lowercase();
            candidates(value).any(|c| {
                c.as_str()
                    .is_some_and(|s| s.to_ascii_lowercase().contains(&needle))
            })
        }
        Predicate::ContainsAll(operands) => {
            !operands.is_empty()
                && operands
                    .iter()
                    .all(|operand| field_matches(value, &Predicate::Eq(operand.clone())))
        }
        Predicate::Gt(n) => candidates(value).any(|c| c.as_f64().is_some_and(|x| x > *n as f64)),
        Predicate::Lt(n) => candidates(value).any(|c| c.as_f64().is_some_and(|x| x < *n as f64)),
        Predicate::In(operands) => operands
            .iter()
            .any(|operand| field_matches(value, &Predicate::Eq(operand.clone()))),
        Predicate::Exists(expected) => value.is_some_and(|v| !v.is_null()) == *expected,
    }
}

/// Values a scalar predicate is tested against: the elements of an array,
/// the value itself for a scalar, nothing for an object or a missing field.
fn candidates(value: Option<&Value>) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Some(Value::Array(items)) => Box::new(items.iter()),
        Some(Value::Object(_)) | None => Box::new(std::iter::empty()),
        Some(scalar) => Box::new(std::iter::once(scalar)),
    }
}

fn scalar_eq(candidate: &Value, expected: &Value) -> bool {
    match (candidate, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}

/// Structural equality with numbers compared by value.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        (Value::Null, Value::Null) => true,
        _ => scalar_eq(a, b),
    }
}

/// A comparable projection of a field for sorting.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// Missing or null.
    Null,
    /// Numbers and booleans.
    Number(f64),
    /// Strings, and arrays or objects as JSON text.
    Text(String),
}

impl SortKey {
    /// Projects the value at `path`.
    pub fn of(doc: &Value, path: &str) -> Self {
        match lookup(doc, path) {
            None | Some(Value::Null) => SortKey::Null,
            Some(Value::Bool(b)) => SortKey::Number(if *b { 1.0 } else { 0.0 }),
            Some(Value::Number(n)) => SortKey::Number(n.as_f64().unwrap_or(0.0)),
            Some(Value::String(s)) => SortKey::Text(s.clone()),
            Some(other) => SortKey::Text(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
        }
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// The values a document contributes to a unique index, or `None` when any
/// of them is missing, null or an empty string.
pub fn index_key(doc: &Value, index: &UniqueIndex) -> Option<Vec<Value>> {
    index
        .fields()
        .into_iter()
        .map(|field| match lookup(doc, field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(v) => Some(v.clone()),
        })
        .collect()
}

fn invalid_update(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "document".to_string(),
        message,
        source: None,
    })
}

/// Applies an update in place. Returns `true` when the document changed.
pub fn apply_update(doc: &mut Value, update: &Update) -> StorageResult<bool> {
    let before = doc.clone();
    for op in update.ops() {
        apply_op(doc, op)?;
    }
    Ok(*doc != before)
}

fn apply_op(doc: &mut Value, op: &UpdateOp) -> StorageResult<()> {
    match op {
        UpdateOp::Set(path, value) => {
            *slot(doc, path)? = value.clone();
        }
        UpdateOp::Unset(path) => {
            let segments: Vec<&str> = path_segments(path).collect();
            if let Some((last, parents)) = segments.split_last() {
                let parent = parents.iter().try_fold(&mut *doc, |current, segment| {
                    current.as_object_mut().and_then(|map| map.get_mut(*segment))
                });
                if let Some(Value::Object(map)) = parent {
                    map.remove(*last);
                }
            }
        }
        UpdateOp::Inc(path, by) => {
            let target = slot(doc, path)?;
            *target = match &*target {
                Value::Null => Value::from(*by),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::from(i.saturating_add(*by)),
                    None => Value::from(n.as_f64().unwrap_or(0.0) + *by as f64),
                },
                other => {
                    return Err(invalid_update(format!(
                        "cannot increment non-numeric field '{}' ({})",
                        path, other
                    )));
                }
            };
        }
        UpdateOp::Push(path, value) => {
            array_slot(doc, path)?.push(value.clone());
        }
        UpdateOp::AddToSet(path, value) => {
            let items = array_slot(doc, path)?;
            if !items.iter().any(|item| json_eq(item, value)) {
                items.push(value.clone());
            }
        }
        UpdateOp::Pull(path, value) => {
            if let Some(Value::Array(items)) = lookup_mut(doc, path) {
                items.retain(|item| !json_eq(item, value));
            }
        }
        UpdateOp::PullMatching(path, condition) => {
            if let Some(Value::Array(items)) = lookup_mut(doc, path) {
                items.retain(|item| !matches(item, condition));
            }
        }
        UpdateOp::SetMatching {
            array,
            filter,
            field,
            value,
        } => {
            if let Some(Value::Array(items)) = lookup_mut(doc, array) {
                for item in items.iter_mut().filter(|item| matches(item, filter)) {
                    *slot(item, field)? = value.clone();
                }
            }
        }
    }
    Ok(())
}

fn lookup_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path_segments(path).try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        _ => None,
    })
}

/// Mutable slot at `path`, creating intermediate objects and a null leaf.
fn slot<'a>(doc: &'a mut Value, path: &str) -> StorageResult<&'a mut Value> {
    let mut current = doc;
    for segment in path_segments(path) {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            other => {
                return Err(invalid_update(format!(
                    "cannot traverse '{}' through {} at '{}'",
                    path, other, segment
                )));
            }
        };
    }
    Ok(current)
}

fn array_slot<'a>(doc: &'a mut Value, path: &str) -> StorageResult<&'a mut Vec<Value>> {
    let target = slot(doc, path)?;
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    match target {
        Value::Array(items) => Ok(items),
        other => Err(invalid_update(format!(
            "field '{}' is not an array ({})",
            path, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": "Web-01",
            "status": "accepted",
            "count": 3,
            "online": true,
            "tags": ["prod", "eu"],
            "identity": {"mac": "aa:bb"},
            "members": [
                {"id": "u1", "role": "owner"},
                {"id": "u2", "role": "observer"}
            ],
            "none": null
        })
    }

    #[test]
    fn test_eq_on_scalars_arrays_and_paths() {
        let d = doc();
        assert!(matches(&d, &Condition::eq("status", "accepted")));
        assert!(!matches(&d, &Condition::eq("status", "pending")));
        assert!(matches(&d, &Condition::eq("tags", "eu")));
        assert!(matches(&d, &Condition::eq("tags", json!(["prod", "eu"]))));
        assert!(matches(&d, &Condition::eq("identity.mac", "aa:bb")));
        assert!(matches(&d, &Condition::eq("count", 3.0)));
        assert!(!matches(&d, &Condition::eq("count", "3")));
        assert!(!matches(&d, &Condition::eq("identity", "aa:bb")));
    }

    #[test]
    fn test_eq_null_matches_missing() {
        let d = doc();
        assert!(matches(&d, &Condition::eq("none", Value::Null)));
        assert!(matches(&d, &Condition::eq("missing", Value::Null)));
        assert!(!matches(&d, &Condition::eq("name", Value::Null)));
    }

    #[test]
    fn test_contains_text_is_case_insensitive_literal() {
        let d = doc();
        let contains = |s: &str| Condition::Field("name".into(), Predicate::ContainsText(s.into()));
        assert!(matches(&d, &contains("web")));
        assert!(matches(&d, &contains("B-0")));
        assert!(!matches(&d, &contains("web.*")));
        assert!(matches(&d, &contains("")));
    }

    #[test]
    fn test_contains_all() {
        let d = doc();
        let all = |v: Vec<Value>| Condition::Field("tags".into(), Predicate::ContainsAll(v));
        assert!(matches(&d, &all(vec![json!("prod"), json!("eu")])));
        assert!(!matches(&d, &all(vec![json!("prod"), json!("us")])));
        assert!(!matches(&d, &all(vec![])));
    }

    #[test]
    fn test_numeric_comparisons_skip_non_numbers() {
        let d = doc();
        assert!(matches(&d, &Condition::gt("count", 2)));
        assert!(!matches(&d, &Condition::gt("count", 3)));
        assert!(matches(&d, &Condition::lt("count", 4)));
        assert!(!matches(&d, &Condition::gt("online", 0)));
        assert!(!matches(&d, &Condition::gt("name", 0)));
    }

    #[test]
    fn test_boolean_combinators() {
        let d = doc();
        assert!(matches(&d, &Condition::always()));
        assert!(!matches(&d, &Condition::Or(vec![])));
        assert!(matches(&d, &Condition::ne("status", "pending")));
        assert!(matches(&d, &Condition::ne("missing", "x")));
        assert!(matches(&d, &Condition::is_in("status", ["pending", "accepted"])));
        assert!(!matches(&d, &Condition::is_in("status", Vec::<String>::new())));
    }

    #[test]
    fn test_exists() {
        let d = doc();
        assert!(matches(&d, &Condition::Field("name".into(), Predicate::Exists(true))));
        assert!(matches(&d, &Condition::Field("none".into(), Predicate::Exists(false))));
        assert!(matches(&d, &Condition::Field("nope".into(), Predicate::Exists(false))));
    }

    #[test]
    fn test_elem_match_is_relative_to_element() {
        let d = doc();
        assert!(matches(
            &d,
            &Condition::elem_match(
                "members",
                Condition::all([Condition::eq("id", "u2"), Condition::eq("role", "observer")])
            )
        ));
        assert!(!matches(
            &d,
            &Condition::elem_match(
                "members",
                Condition::all([Condition::eq("id", "u2"), Condition::eq("role", "owner")])
            )
        ));
        assert!(!matches(&d, &Condition::elem_match("identity", Condition::always())));
    }

    #[test]
    fn test_apply_set_unset_inc() {
        let mut d = doc();
        let update = Update::new()
            .set("identity.ip", "10.0.0.1")
            .set("settings.session_record", true)
            .unset("none")
            .inc("count", -1)
            .inc("fresh", 2);
        assert!(apply_update(&mut d, &update).unwrap());
        assert_eq!(d["identity"]["ip"], json!("10.0.0.1"));
        assert_eq!(d["settings"]["session_record"], json!(true));
        assert!(d.get("none").is_none());
        assert_eq!(d["count"], json!(2));
        assert_eq!(d["fresh"], json!(2));
    }

    #[test]
    fn test_apply_array_ops() {
        let mut d = doc();
        let update = Update::new()
            .push("tags", "new")
            .add_to_set("tags", "prod")
            .pull("tags", "eu")
            .push("created", 1);
        apply_update(&mut d, &update).unwrap();
        assert_eq!(d["tags"], json!(["prod", "new"]));
        assert_eq!(d["created"], json!([1]));
    }

    #[test]
    fn test_apply_matching_ops() {
        let mut d = doc();
        let update = Update::new()
            .set_matching("members", Condition::eq("id", "u1"), "role", "administrator")
            .pull_matching("members", Condition::eq("id", "u2"));
        apply_update(&mut d, &update).unwrap();
        assert_eq!(d["members"], json!([{"id": "u1", "role": "administrator"}]));
    }

    #[test]
    fn test_apply_reports_unchanged() {
        let mut d = doc();
        let update = Update::new().set("status", "accepted").pull("tags", "absent");
        assert!(!apply_update(&mut d, &update).unwrap());
    }

    #[test]
    fn test_apply_rejects_type_mismatch() {
        let mut d = doc();
        assert!(apply_update(&mut d, &Update::new().inc("name", 1)).is_err());
        assert!(apply_update(&mut d, &Update::new().push("name", 1)).is_err());
        assert!(apply_update(&mut d, &Update::new().set("name.first", 1)).is_err());
    }

    #[test]
    fn test_sort_key_order() {
        let mut keys = vec![
            SortKey::Text("b".into()),
            SortKey::Number(2.0),
            SortKey::Null,
            SortKey::Text("B".into()),
            SortKey::Number(-1.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SortKey::Null,
                SortKey::Number(-1.0),
                SortKey::Number(2.0),
                SortKey::Text("B".into()),
                SortKey::Text("b".into()),
            ]
        );
        assert_eq!(SortKey::of(&doc(), "online"), SortKey::Number(1.0));
    }

    #[test]
    fn test_index_key_skips_empty() {
        let index = crate::core::Collection::Devices.unique_indexes()[1];
        assert_eq!(
            index_key(&json!({"tenant_id": "t", "name": "web"}), &index),
            Some(vec![json!("t"), json!("web")])
        );
        assert_eq!(index_key(&json!({"tenant_id": "t", "name": ""}), &index), None);
        assert_eq!(index_key(&json!({"name": "web"}), &index), None);
    }
}
