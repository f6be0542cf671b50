//! Executor over one SQLite connection.

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior, params, params_from_iter};
use serde_json::Value;

use crate::backends::eval::apply_update;
use crate::core::{Collection, Executor, Update, UpdateResult};
use crate::error::{StorageError, StorageResult};
use crate::query::{Condition, Stage};
use crate::tenant::Interrupt;

use super::sql::{self, SqlFragment};

/// Runs document operations on a borrowed connection.
///
/// Outside a transaction every write opens its own `IMMEDIATE` transaction;
/// inside one, writes are wrapped in a savepoint so a failed multi-document
/// write leaves nothing behind.
pub(crate) struct SqliteExecutor<'a> {
    conn: &'a Connection,
    in_transaction: bool,
    interrupt: Interrupt,
}

impl<'a> SqliteExecutor<'a> {
    pub(crate) fn new(conn: &'a Connection, in_transaction: bool, interrupt: Interrupt) -> Self {
        Self {
            conn,
            in_transaction,
            interrupt,
        }
    }

    fn check(&self) -> StorageResult<()> {
        if self.interrupt.should_stop() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn atomic<R>(&self, f: impl FnOnce(&Connection) -> StorageResult<R>) -> StorageResult<R> {
        if self.in_transaction {
            self.conn.execute_batch("SAVEPOINT document_write")?;
            match f(self.conn) {
                Ok(value) => {
                    self.conn.execute_batch("RELEASE document_write")?;
                    Ok(value)
                }
                Err(e) => {
                    self.conn
                        .execute_batch("ROLLBACK TO document_write; RELEASE document_write")?;
                    Err(e)
                }
            }
        } else {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        }
    }

    fn select(&self, fragment: &SqlFragment) -> StorageResult<Vec<(i64, Value)>> {
        select_rows(self.conn, fragment)
    }
}

fn select_rows(conn: &Connection, fragment: &SqlFragment) -> StorageResult<Vec<(i64, Value)>> {
    let mut stmt = conn.prepare(&fragment.sql)?;
    let rows = stmt.query_map(params_from_iter(fragment.params.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, data) = row?;
        out.push((id, serde_json::from_str(&data)?));
    }
    Ok(out)
}

/// Maps a unique index violation to the field the index guards.
fn write_error(collection: Collection, err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err {
        if code.code == ErrorCode::ConstraintViolation {
            let violated = collection
                .unique_indexes()
                .iter()
                .find(|index| message.contains(&format!("'{}'", index.name(collection))));
            if let Some(index) = violated {
                return StorageError::duplicate(collection.entity(), vec![index.field.to_string()]);
            }
        }
    }
    err.into()
}

impl Executor for SqliteExecutor<'_> {
    fn find(&mut self, collection: Collection, stages: &[Stage]) -> StorageResult<Vec<Value>> {
        self.check()?;
        let fragment = sql::compile_pipeline(collection, stages);
        tracing::trace!(collection = collection.name(), sql = %fragment.sql, "find");
        Ok(self
            .select(&fragment)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    fn count(&mut self, collection: Collection, condition: &Condition) -> StorageResult<u64> {
        self.check()?;
        let fragment = sql::compile_count(collection, condition);
        let count: i64 = self.conn.query_row(
            &fragment.sql,
            params_from_iter(fragment.params.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn insert(&mut self, collection: Collection, documents: Vec<Value>) -> StorageResult<()> {
        self.check()?;
        self.atomic(|conn| {
            let mut stmt =
                conn.prepare_cached("INSERT INTO documents (collection, data) VALUES (?1, ?2)")?;
            for doc in &documents {
                stmt.execute(params![collection.name(), doc.to_string()])
                    .map_err(|e| write_error(collection, e))?;
            }
            Ok(())
        })
    }

    fn update(
        &mut self,
        collection: Collection,
        condition: &Condition,
        update: &Update,
        multi: bool,
    ) -> StorageResult<UpdateResult> {
        self.check()?;
        let fragment = sql::compile_targets(collection, condition, multi);
        self.atomic(|conn| {
            let targets = select_rows(conn, &fragment)?;
            let mut result = UpdateResult::default();
            let mut stmt = conn.prepare_cached("UPDATE documents SET data = ?1 WHERE id = ?2")?;
            for (id, mut doc) in targets {
                result.matched += 1;
                if apply_update(&mut doc, update)? {
                    stmt.execute(params![doc.to_string(), id])
                        .map_err(|e| write_error(collection, e))?;
                    result.modified += 1;
                }
            }
            Ok(result)
        })
    }

    fn delete(
        &mut self,
        collection: Collection,
        condition: &Condition,
        multi: bool,
    ) -> StorageResult<u64> {
        self.check()?;
        let fragment = sql::compile_targets(collection, condition, multi);
        self.atomic(|conn| {
            let targets = select_rows(conn, &fragment)?;
            let mut stmt = conn.prepare_cached("DELETE FROM documents WHERE id = ?1")?;
            let mut deleted = 0u64;
            for (id, _) in targets {
                deleted += stmt.execute([id])? as u64;
            }
            Ok(deleted)
        })
    }

    fn clear(&mut self, collection: Collection) -> StorageResult<()> {
        self.check()?;
        self.atomic(|conn| {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1",
                [collection.name()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::eval::matches;
    use crate::backends::sqlite::schema;
    use crate::query::{Order, Predicate};
    use crate::tenant::RequestContext;
    use serde_json::json;

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    fn corpus() -> Vec<Value> {
        vec![
            json!({"uid": "1", "tenant_id": "t", "name": "web-01", "status": "accepted",
                   "tags": ["prod", "eu"], "identity": {"mac": "aa"}, "count": 3,
                   "online": true}),
            json!({"uid": "2", "tenant_id": "t", "name": "Web-02", "status": "pending",
                   "tags": ["dev"], "identity": {"mac": "bb"}, "count": 7,
                   "online": false, "gone": null}),
            json!({"uid": "3", "tenant_id": "u", "name": "db", "status": "accepted",
                   "tags": [], "count": 1.5, "members": [{"id": "a", "role": "owner"},
                   {"id": "b", "role": "observer"}]}),
            json!({"uid": "4", "tenant_id": "u", "name": "cache", "status": "removed",
                   "tags": [null, "prod"], "members": ["a"], "info": {"id": "x"}}),
        ]
    }

    fn uids(docs: &[Value]) -> Vec<String> {
        docs.iter()
            .map(|d| d["uid"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_conditions_agree_with_evaluator() {
        let conn = connection();
        let mut exec = SqliteExecutor::new(&conn, false, RequestContext::new().interrupt());
        exec.insert(Collection::Devices, corpus()).unwrap();

        let conditions = vec![
            Condition::eq("status", "accepted"),
            Condition::ne("status", "accepted"),
            Condition::eq("tags", "prod"),
            Condition::eq("tags", json!(["dev"])),
            Condition::eq("identity.mac", "bb"),
            Condition::eq("gone", Value::Null),
            Condition::eq("tags", Value::Null),
            Condition::eq("online", true),
            Condition::eq("online", false),
            Condition::eq("count", 3),
            Condition::gt("count", 2),
            Condition::lt("count", 2),
            Condition::Field("name".into(), Predicate::ContainsText("WEB".into())),
            Condition::Field("tags".into(), Predicate::ContainsAll(vec![json!("prod"), json!("eu")])),
            Condition::Field("tags".into(), Predicate::ContainsAll(vec![])),
            Condition::is_in("name", vec![json!("db"), json!("cache")]),
            Condition::is_in("name", Vec::<Value>::new()),
            Condition::Field("info".into(), Predicate::Exists(true)),
            Condition::Field("gone".into(), Predicate::Exists(false)),
            Condition::eq("info", "x"),
            Condition::elem_match(
                "members",
                Condition::all([Condition::eq("id", "a"), Condition::eq("role", "owner")]),
            ),
            Condition::elem_match("members", Condition::eq("id", "b")),
            Condition::Or(vec![Condition::eq("uid", "1"), Condition::eq("uid", "4")]),
        ];

        let all = corpus();
        for condition in conditions {
            let expected: Vec<Value> =
                all.iter().filter(|d| matches(d, &condition)).cloned().collect();
            let found = exec
                .find(Collection::Devices, &[Stage::Match(condition.clone())])
                .unwrap();
            assert_eq!(uids(&found), uids(&expected), "condition {:?}", condition);
            assert_eq!(
                exec.count(Collection::Devices, &condition).unwrap(),
                expected.len() as u64
            );
        }
    }

    #[test]
    fn test_sort_and_window() {
        let conn = connection();
        let mut exec = SqliteExecutor::new(&conn, false, RequestContext::new().interrupt());
        exec.insert(Collection::Devices, corpus()).unwrap();

        let found = exec
            .find(
                Collection::Devices,
                &[
                    Stage::Sort {
                        field: "count".into(),
                        order: Order::Desc,
                    },
                    Stage::Skip(1),
                    Stage::Limit(2),
                ],
            )
            .unwrap();
        assert_eq!(uids(&found), vec!["1", "3"]);

        let found = exec
            .find(
                Collection::Devices,
                &[
                    Stage::Limit(3),
                    Stage::Match(Condition::eq("status", "accepted")),
                ],
            )
            .unwrap();
        assert_eq!(uids(&found), vec!["1", "3"]);
    }

    #[test]
    fn test_duplicate_maps_to_field() {
        let conn = connection();
        let mut exec = SqliteExecutor::new(&conn, false, RequestContext::new().interrupt());
        exec.insert(Collection::Tags, vec![json!({"id": "1", "tenant_id": "t", "name": "a"})])
            .unwrap();
        let err = exec
            .insert(
                Collection::Tags,
                vec![
                    json!({"id": "2", "tenant_id": "t", "name": "b"}),
                    json!({"id": "3", "tenant_id": "t", "name": "a"}),
                ],
            )
            .unwrap_err();
        assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));
        assert_eq!(exec.count(Collection::Tags, &Condition::always()).unwrap(), 1);
    }

    #[test]
    fn test_update_and_delete() {
        let conn = connection();
        let mut exec = SqliteExecutor::new(&conn, false, RequestContext::new().interrupt());
        exec.insert(Collection::Devices, corpus()).unwrap();

        let result = exec
            .update(
                Collection::Devices,
                &Condition::eq("tenant_id", "t"),
                &Update::new().set("status", "accepted"),
                true,
            )
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 2, modified: 1 });

        let deleted = exec
            .delete(Collection::Devices, &Condition::eq("tenant_id", "u"), false)
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(exec.count(Collection::Devices, &Condition::always()).unwrap(), 3);

        exec.clear(Collection::Devices).unwrap();
        assert_eq!(exec.count(Collection::Devices, &Condition::always()).unwrap(), 0);
    }
}
