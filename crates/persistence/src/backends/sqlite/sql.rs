//! Condition and pipeline compilation to SQLite SQL.
//!
//! Documents live as JSON text in `documents.data`. Conditions compile to SQL
//! over `json_type`/`json_each`/`json_extract`; every value and every JSON
//! path is a bound parameter. Array fields are matched element-wise through
//! `json_each`, which also yields a single row for a scalar.

use rusqlite::ToSql;
use rusqlite::types::{Null, ToSqlOutput};
use serde_json::Value;

use crate::core::Collection;
use crate::query::{Condition, Order, Predicate, Stage, path_segments};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    /// The SQL text, using anonymous `?` placeholders.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text parameter.
    Text(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Real(f64),
    /// Null parameter.
    Null,
}

impl SqlParam {
    /// Creates a text parameter.
    pub fn text(s: impl Into<String>) -> Self {
        SqlParam::Text(s.into())
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Real(f) => ToSqlOutput::from(*f),
            SqlParam::Null => ToSqlOutput::from(Null),
        })
    }
}

impl SqlFragment {
    /// Creates a fragment without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Appends SQL text.
    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends another fragment, text and parameters.
    pub fn push(&mut self, other: SqlFragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    /// Appends a placeholder bound to `param`.
    pub fn bind(&mut self, param: SqlParam) {
        self.sql.push('?');
        self.params.push(param);
    }

    fn join(parts: Vec<SqlFragment>, separator: &str, empty: &str) -> SqlFragment {
        if parts.is_empty() {
            return SqlFragment::new(empty);
        }
        let mut out = SqlFragment::new("(");
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push_sql(separator);
            }
            out.push_sql("(");
            out.push(part);
            out.push_sql(")");
        }
        out.push_sql(")");
        out
    }
}

/// SQLite JSON path for a dotted document path, e.g. `$."identity"."mac"`.
pub fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for segment in path_segments(path) {
        out.push_str(".\"");
        out.push_str(&segment.replace('"', ""));
        out.push('"');
    }
    out
}

/// Compiles a condition evaluated against the JSON held by `src`.
///
/// `depth` names the aliases of nested `json_each` scans so element matches
/// can nest.
pub fn compile_condition(condition: &Condition, src: &str, depth: usize) -> SqlFragment {
    match condition {
        Condition::And(parts) => SqlFragment::join(
            parts.iter().map(|c| compile_condition(c, src, depth)).collect(),
            " AND ",
            "1",
        ),
        Condition::Or(parts) => SqlFragment::join(
            parts.iter().map(|c| compile_condition(c, src, depth)).collect(),
            " OR ",
            "0",
        ),
        Condition::Not(inner) => {
            let mut out = SqlFragment::new("NOT (");
            out.push(compile_condition(inner, src, depth));
            out.push_sql(")");
            out
        }
        Condition::Field(path, predicate) => compile_predicate(path, predicate, src, depth),
        Condition::ElemMatch(path, inner) => {
            let alias = format!("e{}", depth);
            let p = json_path(path);
            let mut out = SqlFragment::new(format!("(IFNULL(json_type({src}, "));
            out.bind(SqlParam::text(&p));
            out.push_sql(&format!(
                "), '') = 'array' AND EXISTS (SELECT 1 FROM json_each({src}, "
            ));
            out.bind(SqlParam::text(&p));
            out.push_sql(&format!(") AS {alias} WHERE {alias}.type = 'object' AND "));
            out.push(compile_condition(inner, &format!("{alias}.value"), depth + 1));
            out.push_sql("))");
            out
        }
    }
}

fn compile_predicate(path: &str, predicate: &Predicate, src: &str, depth: usize) -> SqlFragment {
    let p = json_path(path);
    match predicate {
        Predicate::Eq(Value::Null) => {
            let row = format!("j{}", depth);
            let mut out = SqlFragment::new(format!("(IFNULL(json_type({src}, "));
            out.bind(SqlParam::text(&p));
            out.push_sql(&format!("), 'null') = 'null' OR (IFNULL(json_type({src}, "));
            out.bind(SqlParam::text(&p));
            out.push_sql(&format!(
                "), '') = 'array' AND EXISTS (SELECT 1 FROM json_each({src}, "
            ));
            out.bind(SqlParam::text(&p));
            out.push_sql(&format!(") AS {row} WHERE {row}.type = 'null')))"));
            out
        }
        Predicate::Eq(value @ (Value::Array(_) | Value::Object(_))) => {
            let mut out = SqlFragment::new(format!("(json_extract({src}, "));
            out.bind(SqlParam::text(&p));
            out.push_sql(") IS json(");
            out.bind(SqlParam::Text(value.to_string()));
            out.push_sql("))");
            out
        }
        Predicate::Eq(value) => scan(src, &p, depth, |row| scalar_eq(row, value)),
        Predicate::ContainsText(needle) => scan(src, &p, depth, |row| {
            let mut out = SqlFragment::new(format!(
                "{row}.type = 'text' AND instr(lower({row}.atom), lower("
            ));
            out.bind(SqlParam::text(needle));
            out.push_sql(")) > 0");
            out
        }),
        Predicate::ContainsAll(operands) => {
            if operands.is_empty() {
                return SqlFragment::new("0");
            }
            SqlFragment::join(
                operands
                    .iter()
                    .map(|v| compile_predicate(path, &Predicate::Eq(v.clone()), src, depth))
                    .collect(),
                " AND ",
                "1",
            )
        }
        Predicate::Gt(n) => scan(src, &p, depth, |row| numeric(row, ">", *n)),
        Predicate::Lt(n) => scan(src, &p, depth, |row| numeric(row, "<", *n)),
        Predicate::In(operands) => SqlFragment::join(
            operands
                .iter()
                .map(|v| compile_predicate(path, &Predicate::Eq(v.clone()), src, depth))
                .collect(),
            " OR ",
            "0",
        ),
        Predicate::Exists(expected) => {
            let mut out = SqlFragment::new(format!("(IFNULL(json_type({src}, "));
            out.bind(SqlParam::text(&p));
            out.push_sql(if *expected {
                "), 'null') <> 'null')"
            } else {
                "), 'null') = 'null')"
            });
            out
        }
    }
}

/// `value` is a scalar or an array with some element satisfying `row_predicate`.
fn scan(
    src: &str,
    p: &str,
    depth: usize,
    row_predicate: impl FnOnce(&str) -> SqlFragment,
) -> SqlFragment {
    let row = format!("j{}", depth);
    let mut out = SqlFragment::new(format!("(IFNULL(json_type({src}, "));
    out.bind(SqlParam::text(p));
    out.push_sql(&format!(
        "), 'object') <> 'object' AND EXISTS (SELECT 1 FROM json_each({src}, "
    ));
    out.bind(SqlParam::text(p));
    out.push_sql(&format!(") AS {row} WHERE "));
    out.push(row_predicate(&row));
    out.push_sql("))");
    out
}

fn scalar_eq(row: &str, value: &Value) -> SqlFragment {
    match value {
        Value::Bool(true) => SqlFragment::new(format!("{row}.type = 'true'")),
        Value::Bool(false) => SqlFragment::new(format!("{row}.type = 'false'")),
        Value::Number(n) => {
            let param = match n.as_i64() {
                Some(i) => SqlParam::Integer(i),
                None => SqlParam::Real(n.as_f64().unwrap_or(0.0)),
            };
            let mut out =
                SqlFragment::new(format!("{row}.type IN ('integer', 'real') AND {row}.atom = "));
            out.bind(param);
            out
        }
        Value::String(s) => {
            let mut out = SqlFragment::new(format!("{row}.type = 'text' AND {row}.atom = "));
            out.bind(SqlParam::text(s));
            out
        }
        // Handled by the callers.
        Value::Null | Value::Array(_) | Value::Object(_) => SqlFragment::new("0"),
    }
}

fn numeric(row: &str, op: &str, n: i64) -> SqlFragment {
    let mut out = SqlFragment::new(format!(
        "{row}.type IN ('integer', 'real') AND {row}.atom {op} "
    ));
    out.bind(SqlParam::Integer(n));
    out
}

/// One SELECT level of a pipeline.
struct Level {
    wheres: Vec<Condition>,
    sorts: Vec<(String, Order)>,
    offset: u64,
    limit: Option<u64>,
}

impl Level {
    fn new() -> Self {
        Self {
            wheres: Vec::new(),
            sorts: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    fn is_windowed(&self) -> bool {
        self.offset > 0 || self.limit.is_some()
    }
}

/// Compiles a stage pipeline into a query returning `(rid, data)` rows.
///
/// Stages in canonical order (matches, sorts, skip, limit) compile to one
/// SELECT. A match or sort following a skip or limit wraps what precedes it
/// in a subquery that numbers its rows, so later levels keep the earlier
/// order as their tie-breaker.
pub fn compile_pipeline(collection: Collection, stages: &[Stage]) -> SqlFragment {
    let mut levels = vec![Level::new()];

    for stage in stages {
        let needs_wrap = matches!(stage, Stage::Match(_) | Stage::Sort { .. })
            && levels.last().is_some_and(Level::is_windowed);
        if needs_wrap {
            levels.push(Level::new());
        }
        let Some(level) = levels.last_mut() else {
            break;
        };
        match stage {
            Stage::Match(condition) => level.wheres.push(condition.clone()),
            Stage::Sort { field, order } => level.sorts.push((field.clone(), *order)),
            Stage::Skip(n) => {
                level.offset = level.offset.saturating_add(*n);
                level.limit = level.limit.map(|l| l.saturating_sub(*n));
            }
            Stage::Limit(n) => level.limit = Some(level.limit.map_or(*n, |l| l.min(*n))),
        }
    }

    let mut source = SqlFragment::new("(SELECT id AS rid, data FROM documents WHERE collection = ");
    source.bind(SqlParam::text(collection.name()));
    source.push_sql(")");

    let last = levels.len() - 1;
    for (n, level) in levels.iter().enumerate() {
        let tiebreak = if n == 0 {
            "rid".to_string()
        } else {
            format!("seq{}", n - 1)
        };
        let order_by = order_terms(level, &tiebreak);

        let mut select = SqlFragment::new("SELECT rid, data");
        if n != last {
            select.push_sql(", ROW_NUMBER() OVER (ORDER BY ");
            select.push(order_by.clone());
            select.push_sql(&format!(") AS seq{}", n));
        }
        select.push_sql(" FROM ");
        select.push(source);
        if !level.wheres.is_empty() {
            select.push_sql(" WHERE ");
            select.push(compile_condition(
                &Condition::all(level.wheres.iter().cloned()),
                "data",
                0,
            ));
        }
        select.push_sql(" ORDER BY ");
        select.push(order_by);
        if level.is_windowed() {
            select.push_sql(" LIMIT ");
            select.bind(SqlParam::Integer(
                level.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX)),
            ));
            select.push_sql(" OFFSET ");
            select.bind(SqlParam::Integer(
                i64::try_from(level.offset).unwrap_or(i64::MAX),
            ));
        }

        source = if n == last {
            select
        } else {
            let mut wrapped = SqlFragment::new("(");
            wrapped.push(select);
            wrapped.push_sql(")");
            wrapped
        };
    }

    source
}

fn order_terms(level: &Level, tiebreak: &str) -> SqlFragment {
    let mut out = SqlFragment::new("");
    // A later sort stage is the primary key; earlier ones break its ties.
    for (field, order) in level.sorts.iter().rev() {
        out.push_sql("json_extract(data, ");
        out.bind(SqlParam::text(json_path(field)));
        out.push_sql(match order {
            Order::Asc => ") ASC, ",
            Order::Desc => ") DESC, ",
        });
    }
    out.push_sql(tiebreak);
    out.push_sql(" ASC");
    out
}

/// Compiles `SELECT COUNT(*)` over a condition.
pub fn compile_count(collection: Collection, condition: &Condition) -> SqlFragment {
    let mut out = SqlFragment::new("SELECT COUNT(*) FROM documents WHERE collection = ");
    out.bind(SqlParam::text(collection.name()));
    out.push_sql(" AND ");
    out.push(compile_condition(condition, "data", 0));
    out
}

/// Compiles a selection of `(id, data)` rows for update or delete.
pub fn compile_targets(collection: Collection, condition: &Condition, multi: bool) -> SqlFragment {
    let mut out = SqlFragment::new("SELECT id, data FROM documents WHERE collection = ");
    out.bind(SqlParam::text(collection.name()));
    out.push_sql(" AND ");
    out.push(compile_condition(condition, "data", 0));
    out.push_sql(" ORDER BY id ASC");
    if !multi {
        out.push_sql(" LIMIT 1");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_path_quotes_segments() {
        assert_eq!(json_path("identity.mac"), "$.\"identity\".\"mac\"");
        assert_eq!(json_path("name"), "$.\"name\"");
    }

    #[test]
    fn test_empty_combinators() {
        assert_eq!(compile_condition(&Condition::always(), "data", 0).sql, "1");
        assert_eq!(compile_condition(&Condition::Or(vec![]), "data", 0).sql, "0");
    }

    #[test]
    fn test_values_are_bound_not_inlined() {
        let fragment = compile_condition(&Condition::eq("name", "x' OR 1=1 --"), "data", 0);
        assert!(!fragment.sql.contains("OR 1=1"));
        assert_eq!(
            fragment.params,
            vec![
                SqlParam::text("$.\"name\""),
                SqlParam::text("$.\"name\""),
                SqlParam::text("x' OR 1=1 --"),
            ]
        );
        assert_eq!(
            fragment.sql.matches('?').count(),
            fragment.params.len()
        );
    }

    #[test]
    fn test_placeholder_count_matches_params() {
        let condition = Condition::all([
            Condition::eq("tenant_id", "t"),
            Condition::Or(vec![
                Condition::eq("tags", json!(["a", "b"])),
                Condition::Field("name".into(), Predicate::ContainsText("web".into())),
                Condition::gt("count", 3),
                Condition::eq("gone", Value::Null),
            ]),
            Condition::elem_match(
                "members",
                Condition::all([Condition::eq("id", "u"), Condition::ne("role", "owner")]),
            ),
        ]);
        let fragment = compile_condition(&condition, "data", 0);
        assert_eq!(fragment.sql.matches('?').count(), fragment.params.len());
        assert!(fragment.sql.contains("e0.value"));
    }

    #[test]
    fn test_canonical_pipeline_is_single_select() {
        let fragment = compile_pipeline(
            Collection::Devices,
            &[
                Stage::Match(Condition::eq("status", "accepted")),
                Stage::Sort {
                    field: "name".into(),
                    order: Order::Asc,
                },
                Stage::Skip(10),
                Stage::Limit(5),
            ],
        );
        assert!(!fragment.sql.contains("ROW_NUMBER"));
        assert!(fragment.sql.ends_with("ORDER BY json_extract(data, ?) ASC, rid ASC LIMIT ? OFFSET ?"));
        assert_eq!(fragment.params.last(), Some(&SqlParam::Integer(10)));
        assert_eq!(fragment.sql.matches('?').count(), fragment.params.len());
    }

    #[test]
    fn test_match_after_limit_wraps() {
        let fragment = compile_pipeline(
            Collection::Devices,
            &[
                Stage::Limit(3),
                Stage::Match(Condition::eq("status", "accepted")),
            ],
        );
        assert!(fragment.sql.contains("ROW_NUMBER() OVER (ORDER BY rid ASC) AS seq0"));
        assert!(fragment.sql.ends_with("ORDER BY seq0 ASC"));
        assert_eq!(fragment.sql.matches('?').count(), fragment.params.len());
    }

    #[test]
    fn test_skip_after_limit_folds() {
        let fragment = compile_pipeline(Collection::Tags, &[Stage::Limit(10), Stage::Skip(4)]);
        assert!(!fragment.sql.contains("ROW_NUMBER"));
        let n = fragment.params.len();
        assert_eq!(
            &fragment.params[n - 2..],
            &[SqlParam::Integer(6), SqlParam::Integer(4)]
        );
    }
}
