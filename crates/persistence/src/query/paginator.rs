//! Pagination and sorting parameters.

use serde::{Deserialize, Serialize};

use super::stage::Order;

/// Default page size used by [`Paginator::normalize`].
pub const DEFAULT_PER_PAGE: i64 = 10;

/// Largest page size accepted by [`Paginator::normalize`].
pub const MAX_PER_PAGE: i64 = 100;

/// Page selection. Pages are 1-based.
///
/// A `per_page` below 1 (conventionally `-1`) means "unbounded": the
/// compiler emits no pagination stages and every match is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginator {
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Documents per page.
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    DEFAULT_PER_PAGE
}

impl Default for Paginator {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Paginator {
    /// Creates a paginator.
    pub fn new(page: i64, per_page: i64) -> Self {
        Self { page, per_page }
    }

    /// A paginator that returns every match.
    pub fn unbounded() -> Self {
        Self {
            page: 1,
            per_page: -1,
        }
    }

    /// Clamps user input: page to at least 1, and per-page to `1..=100`,
    /// with non-positive sizes replaced by the default.
    pub fn normalize(self) -> Self {
        let page = self.page.max(1);
        let per_page = if self.per_page < 1 {
            DEFAULT_PER_PAGE
        } else {
            self.per_page.min(MAX_PER_PAGE)
        };
        Self { page, per_page }
    }
}

/// Sort selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    /// Dotted document path to sort on.
    pub by: String,
    /// Direction; any token other than `asc` sorts descending.
    #[serde(default = "default_order")]
    pub order: Order,
}

fn default_order() -> Order {
    Order::Desc
}

impl Sorter {
    /// Creates a sorter.
    pub fn new(by: impl Into<String>, order: Order) -> Self {
        Self {
            by: by.into(),
            order,
        }
    }

    /// Creates a sorter from a raw order token.
    pub fn from_token(by: impl Into<String>, order: &str) -> Self {
        Self::new(by, Order::from_token(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(Paginator::new(0, 0).normalize(), Paginator::new(1, 10));
        assert_eq!(Paginator::new(-4, 500).normalize(), Paginator::new(1, 100));
        assert_eq!(Paginator::new(3, 25).normalize(), Paginator::new(3, 25));
    }

    #[test]
    fn test_serde_defaults() {
        let paginator: Paginator = serde_json::from_str("{}").unwrap();
        assert_eq!(paginator, Paginator::default());

        let sorter: Sorter = serde_json::from_str(r#"{"by":"last_seen","order":"asc"}"#).unwrap();
        assert_eq!(sorter, Sorter::new("last_seen", Order::Asc));

        let sorter: Sorter = serde_json::from_str(r#"{"by":"name"}"#).unwrap();
        assert_eq!(sorter.order, Order::Desc);
    }
}
