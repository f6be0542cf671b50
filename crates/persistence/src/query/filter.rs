//! Filter AST.
//!
//! Filters arrive from list/search endpoints as a JSON array of nodes:
//!
//! ```json
//! [
//!   {"type": "property", "params": {"name": "name", "operator": "contains", "value": "web"}},
//!   {"type": "property", "params": {"name": "online", "operator": "bool", "value": "true"}},
//!   {"type": "operator", "params": {"name": "and"}}
//! ]
//! ```
//!
//! Each `property` node is a single field comparison; an `operator` node closes
//! the properties accumulated since the previous operator into one group.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// Node kind for a field comparison.
pub const FILTER_TYPE_PROPERTY: &str = "property";

/// Node kind for a group combinator.
pub const FILTER_TYPE_OPERATOR: &str = "operator";

/// A single filter node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Either [`FILTER_TYPE_PROPERTY`] or [`FILTER_TYPE_OPERATOR`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Node payload.
    pub params: FilterParams,
}

/// Payload of a filter node.
///
/// The payload shape is decided by its fields, not by the node kind, so a
/// mismatched pair (an `operator` node carrying property params) survives
/// decoding and is rejected by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterParams {
    /// Field comparison.
    Property(PropertyParams),
    /// Group combinator.
    Operator(OperatorParams),
}

/// A field comparison: `name <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyParams {
    /// Dotted document path.
    pub name: String,
    /// One of `contains`, `eq`, `bool`, `gt`.
    pub operator: String,
    /// Comparison operand.
    pub value: FilterValue,
}

/// A group combinator, `and` or `or`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorParams {
    /// Combinator name.
    pub name: String,
}

/// Operand of a property comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// Integral JSON number.
    Int(i64),
    /// Fractional JSON number.
    Float(f64),
    /// JSON string.
    String(String),
    /// JSON array.
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Converts the operand into a document value.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Bool(b) => Value::Bool(*b),
            FilterValue::Int(i) => Value::from(*i),
            FilterValue::Float(f) => Value::from(*f),
            FilterValue::String(s) => Value::String(s.clone()),
            FilterValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(i: i64) -> Self {
        FilterValue::Int(i)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}

impl Filter {
    /// Builds a `property` node.
    pub fn property(
        name: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self {
            kind: FILTER_TYPE_PROPERTY.to_string(),
            params: FilterParams::Property(PropertyParams {
                name: name.into(),
                operator: operator.into(),
                value: value.into(),
            }),
        }
    }

    /// Builds an `operator` node.
    pub fn operator(name: impl Into<String>) -> Self {
        Self {
            kind: FILTER_TYPE_OPERATOR.to_string(),
            params: FilterParams::Operator(OperatorParams { name: name.into() }),
        }
    }
}

/// An ordered list of filter nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterList(pub Vec<Filter>);

impl FilterList {
    /// Decodes a base64-encoded JSON filter list as sent in query strings.
    ///
    /// Both the standard and URL-safe alphabets are accepted. An empty input
    /// decodes to an empty list.
    pub fn decode(encoded: &str) -> QueryResult<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Ok(Self::default());
        }

        let raw = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
            .map_err(|e| QueryError::FilterDecode {
                message: e.to_string(),
            })?;

        Self::from_json(&raw)
    }

    /// Decodes a raw JSON filter list.
    pub fn from_json(raw: &[u8]) -> QueryResult<Self> {
        serde_json::from_slice(raw).map_err(|e| QueryError::FilterDecode {
            message: e.to_string(),
        })
    }

    /// Encodes the list the way [`decode`](Self::decode) expects it.
    pub fn encode(&self) -> String {
        // Serializing plain data cannot fail.
        let raw = serde_json::to_vec(&self.0).unwrap_or_default();
        STANDARD.encode(raw)
    }

    /// Returns the nodes.
    pub fn into_inner(self) -> Vec<Filter> {
        self.0
    }

    /// Returns `true` when there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_property_and_operator_nodes() {
        let json = r#"[
            {"type":"property","params":{"name":"name","operator":"contains","value":"web"}},
            {"type":"operator","params":{"name":"and"}}
        ]"#;
        let list = FilterList::from_json(json.as_bytes()).unwrap();
        assert_eq!(list.0.len(), 2);
        assert_eq!(list.0[0], Filter::property("name", "contains", "web"));
        assert_eq!(list.0[1], Filter::operator("and"));
    }

    #[test]
    fn test_value_variants() {
        let json = r#"[
            {"type":"property","params":{"name":"a","operator":"eq","value":3}},
            {"type":"property","params":{"name":"b","operator":"eq","value":2.5}},
            {"type":"property","params":{"name":"c","operator":"eq","value":true}},
            {"type":"property","params":{"name":"d","operator":"contains","value":["x","y"]}},
            {"type":"property","params":{"name":"e","operator":"eq","value":null}}
        ]"#;
        let list = FilterList::from_json(json.as_bytes()).unwrap().into_inner();
        let values: Vec<_> = list
            .into_iter()
            .map(|f| match f.params {
                FilterParams::Property(p) => p.value,
                FilterParams::Operator(_) => panic!("expected property"),
            })
            .collect();
        assert_eq!(values[0], FilterValue::Int(3));
        assert_eq!(values[1], FilterValue::Float(2.5));
        assert_eq!(values[2], FilterValue::Bool(true));
        assert_eq!(
            values[3],
            FilterValue::List(vec!["x".into(), "y".into()])
        );
        assert_eq!(values[4], FilterValue::Null);
    }

    #[test]
    fn test_base64_roundtrip_and_errors() {
        let list = FilterList(vec![Filter::property("status", "eq", "accepted")]);
        let decoded = FilterList::decode(&list.encode()).unwrap();
        assert_eq!(decoded, list);

        assert!(FilterList::decode("").unwrap().is_empty());
        assert!(matches!(
            FilterList::decode("!!not base64!!"),
            Err(QueryError::FilterDecode { .. })
        ));
        assert!(matches!(
            FilterList::decode(&STANDARD.encode("{not json")),
            Err(QueryError::FilterDecode { .. })
        ));
    }

    #[test]
    fn test_url_safe_alphabet_is_accepted() {
        let list = FilterList(vec![Filter::property("name", "contains", "??>>")]);
        let raw = serde_json::to_vec(&list).unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        assert_eq!(FilterList::decode(&encoded).unwrap(), list);
    }
}
