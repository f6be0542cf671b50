//! Backend-neutral query stages.
//!
//! Engines receive a pipeline of [`Stage`]s and apply them in order. Matching
//! is expressed as a [`Condition`] tree over dotted document paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Order {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    /// Parses an order token. Only `asc` is ascending; every other token,
    /// including `desc` and the empty string, is descending.
    pub fn from_token(token: &str) -> Self {
        if token == "asc" { Order::Asc } else { Order::Desc }
    }

    /// The canonical token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

impl From<String> for Order {
    fn from(token: String) -> Self {
        Order::from_token(&token)
    }
}

impl From<Order> for String {
    fn from(order: Order) -> Self {
        order.as_str().to_string()
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiled unit of query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep documents satisfying the condition.
    Match(Condition),
    /// Order documents by a field.
    Sort {
        /// Dotted document path.
        field: String,
        /// Direction.
        order: Order,
    },
    /// Drop the first `n` documents.
    Skip(u64),
    /// Keep at most `n` documents.
    Limit(u64),
}

/// A boolean expression over a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// All must hold. Empty is true.
    And(Vec<Condition>),
    /// Any must hold. Empty is false.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// A predicate on the value at a dotted path.
    Field(String, Predicate),
    /// Some object element of the array at the path satisfies the inner
    /// condition, whose paths are relative to the element.
    ElemMatch(String, Box<Condition>),
}

/// A comparison applied to the value at a path.
///
/// When the value is an array, the predicate holds if any element satisfies
/// it; `Eq` with an array or object operand compares the whole value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Equal to the operand. `Eq(Null)` also matches a missing field.
    Eq(Value),
    /// Case-insensitive literal substring of a string.
    ContainsText(String),
    /// The array holds every operand. An empty operand list never matches.
    ContainsAll(Vec<Value>),
    /// Numerically greater than.
    Gt(i64),
    /// Numerically less than.
    Lt(i64),
    /// Equal to any operand.
    In(Vec<Value>),
    /// Present and not null (`true`), or missing or null (`false`).
    Exists(bool),
}

impl Condition {
    /// The always-true condition.
    pub fn always() -> Self {
        Condition::And(Vec::new())
    }

    /// `path == value`.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Field(path.into(), Predicate::Eq(value.into()))
    }

    /// `path != value`.
    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Not(Box::new(Self::eq(path, value)))
    }

    /// `path in values`.
    pub fn is_in<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Condition::Field(
            path.into(),
            Predicate::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// `path > n`.
    pub fn gt(path: impl Into<String>, n: i64) -> Self {
        Condition::Field(path.into(), Predicate::Gt(n))
    }

    /// `path < n`.
    pub fn lt(path: impl Into<String>, n: i64) -> Self {
        Condition::Field(path.into(), Predicate::Lt(n))
    }

    /// Some element of the array at `path` matches `inner`.
    pub fn elem_match(path: impl Into<String>, inner: Condition) -> Self {
        Condition::ElemMatch(path.into(), Box::new(inner))
    }

    /// Conjunction that flattens trivially true operands.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut parts = Vec::new();
        for condition in conditions {
            match condition {
                Condition::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::And(parts)
        }
    }
}

/// Splits a dotted path into its segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_tokens() {
        assert_eq!(Order::from_token("asc"), Order::Asc);
        assert_eq!(Order::from_token("desc"), Order::Desc);
        assert_eq!(Order::from_token("ASC"), Order::Desc);
        assert_eq!(Order::from_token(""), Order::Desc);
    }

    #[test]
    fn test_order_serde_accepts_any_token() {
        let order: Order = serde_json::from_str("\"foo\"").unwrap();
        assert_eq!(order, Order::Desc);
        assert_eq!(serde_json::to_string(&Order::Asc).unwrap(), "\"asc\"");
    }

    #[test]
    fn test_all_flattens_nested_and() {
        let condition = Condition::all([
            Condition::always(),
            Condition::eq("a", 1),
            Condition::And(vec![Condition::eq("b", 2)]),
        ]);
        assert_eq!(
            condition,
            Condition::And(vec![Condition::eq("a", 1), Condition::eq("b", 2)])
        );
        assert_eq!(Condition::all([Condition::eq("a", 1)]), Condition::eq("a", 1));
        assert_eq!(Condition::all([]), Condition::always());
    }

    #[test]
    fn test_path_segments() {
        let segments: Vec<_> = path_segments("identity.mac").collect();
        assert_eq!(segments, vec!["identity", "mac"]);
    }
}
