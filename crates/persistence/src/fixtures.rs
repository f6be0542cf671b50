//! Named document fixtures.
//!
//! A fixture is a JSON object naming a collection and listing its documents:
//!
//! ```json
//! {"collection": "tags", "documents": [{"id": "t1", "tenant_id": "...", "name": "prod"}]}
//! ```
//!
//! Every document must carry its collection's key field. Date-time strings
//! in RFC 3339 form become epoch milliseconds, the representation models use
//! for timestamps.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::core::Collection;
use crate::error::{StorageResult, serialization_error};

/// An ordered list of documents for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    /// Fixture name, for lookups and logging.
    pub name: String,
    /// Target collection.
    pub collection: Collection,
    /// Documents in insertion order.
    pub documents: Vec<Value>,
}

#[derive(Deserialize)]
struct RawFixture {
    collection: String,
    documents: Vec<Value>,
}

impl Fixture {
    /// Parses and validates a fixture.
    pub fn from_json(name: impl Into<String>, json: &str) -> StorageResult<Self> {
        let name = name.into();
        let raw: RawFixture = serde_json::from_str(json)?;
        let collection = Collection::from_name(&raw.collection).ok_or_else(|| {
            serialization_error(format!(
                "fixture '{}': unknown collection '{}'",
                name, raw.collection
            ))
        })?;

        let mut documents = raw.documents;
        for (i, doc) in documents.iter_mut().enumerate() {
            if !doc.is_object() {
                return Err(serialization_error(format!(
                    "fixture '{}': document {} is not an object",
                    name, i
                )));
            }
            if let Some(key) = collection.key_field() {
                if doc.get(key).is_none_or(Value::is_null) {
                    return Err(serialization_error(format!(
                        "fixture '{}': document {} has no '{}'",
                        name, i, key
                    )));
                }
            }
            convert_timestamps(doc);
        }

        Ok(Self {
            name,
            collection,
            documents,
        })
    }
}

fn convert_timestamps(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Ok(at) = DateTime::parse_from_rfc3339(s) {
                *value = Value::from(at.timestamp_millis());
            }
        }
        Value::Array(items) => items.iter_mut().for_each(convert_timestamps),
        Value::Object(map) => map.values_mut().for_each(convert_timestamps),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_and_converts_timestamps() {
        let fixture = Fixture::from_json(
            "tags",
            r#"{"collection": "tags", "documents": [
                {"id": "1", "name": "prod", "created_at": "2023-01-01T00:00:00Z",
                 "nested": {"at": ["2023-01-01T00:00:01.500Z", "later"]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(fixture.collection, Collection::Tags);
        let doc = &fixture.documents[0];
        assert_eq!(doc["created_at"], 1672531200000i64);
        assert_eq!(doc["nested"]["at"][0], 1672531201500i64);
        assert_eq!(doc["nested"]["at"][1], "later");
        assert_eq!(doc["name"], "prod");
    }

    #[test]
    fn test_rejects_missing_key_field() {
        let err = Fixture::from_json(
            "devices",
            r#"{"collection": "devices", "documents": [{"name": "web"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'uid'"));
    }

    #[test]
    fn test_rejects_unknown_collection() {
        assert!(Fixture::from_json("x", r#"{"collection": "widgets", "documents": []}"#).is_err());
    }
}
