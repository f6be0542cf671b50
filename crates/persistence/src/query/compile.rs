//! Filter, pagination and sort compilers.
//!
//! These are pure functions: they never touch an engine, so malformed input is
//! rejected before any I/O happens.

use serde_json::Value;

use super::filter::{
    FILTER_TYPE_OPERATOR, FILTER_TYPE_PROPERTY, Filter, FilterParams, FilterValue, PropertyParams,
};
use super::paginator::{Paginator, Sorter};
use super::stage::{Condition, Predicate, Stage};
use crate::error::{QueryError, QueryResult};

/// Compiles a filter list into match stages.
///
/// Property nodes accumulate until an operator node closes them into one
/// match stage combined with that operator (`and` or `or`). Properties left
/// over at the end are combined with `or`.
///
/// Unknown property operators contribute nothing. An unknown combinator
/// drops the properties accumulated for its group. Both are tolerated rather
/// than rejected.
///
/// # Errors
///
/// * [`QueryError::FilterInvalid`] for a node kind other than `property` or
///   `operator`, or a payload that does not fit its kind.
/// * [`QueryError::FilterPropertyInvalid`] when a `bool` or `gt` operand
///   cannot be coerced.
pub fn compile_filters(filters: &[Filter]) -> QueryResult<Vec<Stage>> {
    let mut stages = Vec::new();
    let mut group: Vec<Condition> = Vec::new();

    for filter in filters {
        match filter.kind.as_str() {
            FILTER_TYPE_PROPERTY => {
                let FilterParams::Property(params) = &filter.params else {
                    return Err(QueryError::FilterInvalid {
                        message: "property node without property params".to_string(),
                    });
                };
                if let Some(condition) = compile_property(params)? {
                    group.push(condition);
                }
            }
            FILTER_TYPE_OPERATOR => {
                let FilterParams::Operator(params) = &filter.params else {
                    return Err(QueryError::FilterInvalid {
                        message: "operator node without operator params".to_string(),
                    });
                };
                let accumulated = std::mem::take(&mut group);
                match params.name.as_str() {
                    "and" if !accumulated.is_empty() => {
                        stages.push(Stage::Match(Condition::And(accumulated)))
                    }
                    "or" if !accumulated.is_empty() => {
                        stages.push(Stage::Match(Condition::Or(accumulated)))
                    }
                    "and" | "or" => {}
                    other => {
                        tracing::debug!(
                            combinator = other,
                            dropped = accumulated.len(),
                            "Skipping unknown filter combinator"
                        );
                    }
                }
            }
            other => {
                return Err(QueryError::FilterInvalid {
                    message: format!("unknown filter type '{}'", other),
                });
            }
        }
    }

    if !group.is_empty() {
        stages.push(Stage::Match(Condition::Or(group)));
    }

    Ok(stages)
}

/// Compiles one property comparison. `None` means the property is skipped.
fn compile_property(params: &PropertyParams) -> QueryResult<Option<Condition>> {
    let field = params.name.clone();
    let predicate = match params.operator.as_str() {
        "contains" => match &params.value {
            FilterValue::String(s) => Predicate::ContainsText(s.clone()),
            FilterValue::List(items) => {
                Predicate::ContainsAll(items.iter().map(FilterValue::to_json).collect())
            }
            _ => {
                tracing::debug!(property = %params.name, "Skipping contains with scalar operand");
                return Ok(None);
            }
        },
        "eq" => Predicate::Eq(params.value.to_json()),
        "bool" => Predicate::Eq(Value::Bool(coerce_bool(params)?)),
        "gt" => Predicate::Gt(coerce_int(params)?),
        other => {
            tracing::debug!(property = %params.name, operator = other, "Skipping unknown filter operator");
            return Ok(None);
        }
    };

    Ok(Some(Condition::Field(field, predicate)))
}

fn coerce_bool(params: &PropertyParams) -> QueryResult<bool> {
    match &params.value {
        FilterValue::Bool(b) => Ok(*b),
        FilterValue::Int(i) => Ok(*i != 0),
        FilterValue::String(s) => parse_bool(s).ok_or_else(|| property_invalid(params, "not a boolean")),
        _ => Err(property_invalid(params, "not a boolean")),
    }
}

fn coerce_int(params: &PropertyParams) -> QueryResult<i64> {
    match &params.value {
        FilterValue::Int(i) => Ok(*i),
        FilterValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
            // `i64::MAX as f64` is 2^63, one past the largest i64.
            if (i64::MIN as f64..i64::MAX as f64).contains(f) {
                Ok(*f as i64)
            } else {
                Err(property_invalid(params, "out of integer range"))
            }
        }
        FilterValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| property_invalid(params, &e.to_string())),
        _ => Err(property_invalid(params, "not an integer")),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn property_invalid(params: &PropertyParams, message: &str) -> QueryError {
    QueryError::FilterPropertyInvalid {
        property: params.name.clone(),
        message: message.to_string(),
    }
}

/// Compiles a paginator into skip/limit stages.
///
/// A `per_page` below 1 yields no stages. Otherwise the result is
/// `[Skip(per_page * (page - 1)), Limit(per_page)]`, with pages below 1
/// treated as the first page.
pub fn compile_paginator(paginator: &Paginator) -> Vec<Stage> {
    if paginator.per_page < 1 {
        return Vec::new();
    }

    let per_page = paginator.per_page as u64;
    let page = paginator.page.max(1) as u64;

    vec![
        Stage::Skip(per_page.saturating_mul(page - 1)),
        Stage::Limit(per_page),
    ]
}

/// Compiles a sorter into exactly one sort stage.
pub fn compile_sorter(sorter: &Sorter) -> Stage {
    Stage::Sort {
        field: sorter.by.clone(),
        order: sorter.order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::stage::Order;
    use serde_json::json;

    fn property(name: &str, operator: &str, value: impl Into<FilterValue>) -> Filter {
        Filter::property(name, operator, value)
    }

    #[test]
    fn test_single_eq_defaults_to_or() {
        let stages = compile_filters(&[property("test", "eq", "valid")]).unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::Or(vec![Condition::eq("test", "valid")]))]
        );
    }

    #[test]
    fn test_operator_closes_group() {
        let stages = compile_filters(&[
            property("name", "contains", "web"),
            property("online", "bool", "true"),
            Filter::operator("and"),
            property("status", "eq", "accepted"),
        ])
        .unwrap();

        assert_eq!(
            stages,
            vec![
                Stage::Match(Condition::And(vec![
                    Condition::Field("name".into(), Predicate::ContainsText("web".into())),
                    Condition::eq("online", true),
                ])),
                Stage::Match(Condition::Or(vec![Condition::eq("status", "accepted")])),
            ]
        );
    }

    #[test]
    fn test_contains_list_matches_all() {
        let stages = compile_filters(&[property(
            "tags",
            "contains",
            FilterValue::List(vec!["red".into(), "blue".into()]),
        )])
        .unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::Or(vec![Condition::Field(
                "tags".into(),
                Predicate::ContainsAll(vec![json!("red"), json!("blue")])
            )]))]
        );
    }

    #[test]
    fn test_contains_scalar_is_skipped() {
        let stages = compile_filters(&[property("count", "contains", 3i64)]).unwrap();
        assert!(stages.is_empty());
    }

    #[test]
    fn test_unknown_operator_is_silently_skipped() {
        let stages = compile_filters(&[
            property("name", "like", "web"),
            property("status", "eq", "pending"),
        ])
        .unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::Or(vec![Condition::eq("status", "pending")]))]
        );
    }

    #[test]
    fn test_unknown_combinator_drops_its_group() {
        let stages = compile_filters(&[
            property("name", "eq", "a"),
            Filter::operator("xor"),
            property("name", "eq", "b"),
            Filter::operator("and"),
        ])
        .unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::And(vec![Condition::eq("name", "b")]))]
        );
    }

    #[test]
    fn test_operator_without_properties_emits_nothing() {
        let stages = compile_filters(&[Filter::operator("and")]).unwrap();
        assert!(stages.is_empty());
    }

    #[test]
    fn test_unknown_node_type_is_invalid() {
        let filter = Filter {
            kind: "group".into(),
            params: FilterParams::Operator(super::super::filter::OperatorParams {
                name: "and".into(),
            }),
        };
        assert!(matches!(
            compile_filters(&[filter]),
            Err(QueryError::FilterInvalid { .. })
        ));
    }

    #[test]
    fn test_mismatched_params_are_invalid() {
        let mut filter = Filter::operator("and");
        filter.kind = FILTER_TYPE_PROPERTY.to_string();
        assert!(matches!(
            compile_filters(&[filter]),
            Err(QueryError::FilterInvalid { .. })
        ));

        let mut filter = property("a", "eq", 1i64);
        filter.kind = FILTER_TYPE_OPERATOR.to_string();
        assert!(matches!(
            compile_filters(&[filter]),
            Err(QueryError::FilterInvalid { .. })
        ));
    }

    #[test]
    fn test_bool_coercion() {
        for (value, expected) in [
            (FilterValue::from("true"), true),
            (FilterValue::from("F"), false),
            (FilterValue::from(1i64), true),
            (FilterValue::from(0i64), false),
            (FilterValue::from(true), true),
        ] {
            let stages = compile_filters(&[property("online", "bool", value)]).unwrap();
            assert_eq!(
                stages,
                vec![Stage::Match(Condition::Or(vec![Condition::eq("online", expected)]))]
            );
        }

        let err = compile_filters(&[property("online", "bool", "yes")]).unwrap_err();
        assert!(matches!(
            err,
            QueryError::FilterPropertyInvalid { ref property, .. } if property == "online"
        ));
    }

    #[test]
    fn test_gt_coercion() {
        let stages = compile_filters(&[property("count", "gt", " 42 ")]).unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::Or(vec![Condition::gt("count", 42)]))]
        );

        let stages = compile_filters(&[property("count", "gt", FilterValue::Float(7.0))]).unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::Or(vec![Condition::gt("count", 7)]))]
        );

        let lowest = FilterValue::Float(-9_223_372_036_854_775_808.0);
        let stages = compile_filters(&[property("count", "gt", lowest)]).unwrap();
        assert_eq!(
            stages,
            vec![Stage::Match(Condition::Or(vec![Condition::gt("count", i64::MIN)]))]
        );

        for bad in [
            FilterValue::from("many"),
            FilterValue::Float(1.5),
            FilterValue::Float(1e30),
            FilterValue::Float(-1e30),
            FilterValue::Float(9_223_372_036_854_775_808.0),
            FilterValue::from(true),
        ] {
            assert!(matches!(
                compile_filters(&[property("count", "gt", bad)]),
                Err(QueryError::FilterPropertyInvalid { .. })
            ));
        }
    }

    #[test]
    fn test_paginator() {
        assert_eq!(
            compile_paginator(&Paginator::new(3, 100)),
            vec![Stage::Skip(200), Stage::Limit(100)]
        );
        assert_eq!(
            compile_paginator(&Paginator::new(1, 10)),
            vec![Stage::Skip(0), Stage::Limit(10)]
        );
        assert_eq!(
            compile_paginator(&Paginator::new(0, 5)),
            vec![Stage::Skip(0), Stage::Limit(5)]
        );
        assert!(compile_paginator(&Paginator::unbounded()).is_empty());
        assert!(compile_paginator(&Paginator::new(2, 0)).is_empty());
    }

    #[test]
    fn test_sorter() {
        for (token, expected) in [
            ("asc", Order::Asc),
            ("desc", Order::Desc),
            ("foo", Order::Desc),
            ("", Order::Desc),
        ] {
            assert_eq!(
                compile_sorter(&Sorter::from_token("name", token)),
                Stage::Sort {
                    field: "name".into(),
                    order: expected
                }
            );
        }
    }
}
