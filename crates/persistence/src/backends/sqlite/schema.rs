//! SQLite schema definitions and migrations.
//!
//! The schema is a sequential, reversible change log. Each [`Migration`]
//! carries an `up` and a `down` step; [`migrate_to`] walks the log in either
//! direction, one transaction per step.

use rusqlite::Connection;

use crate::core::Collection;
use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// One reversible schema change.
pub struct Migration {
    /// Version reached after `up`.
    pub version: i32,
    /// Human-readable summary.
    pub description: &'static str,
    up: fn(&Connection) -> StorageResult<()>,
    down: fn(&Connection) -> StorageResult<()>,
}

/// The change log, in version order.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "documents table",
            up: create_documents_v1,
            down: drop_documents_v1,
        },
        Migration {
            version: 2,
            description: "unique indexes",
            up: create_unique_indexes_v2,
            down: drop_unique_indexes_v2,
        },
    ]
}

/// Initialize the database schema at the latest version.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Migrates up or down to `target`.
pub fn migrate_to(conn: &Connection, target: i32) -> StorageResult<()> {
    if !(0..=SCHEMA_VERSION).contains(&target) {
        return Err(migration_error(format!(
            "unknown schema version {} (latest is {})",
            target, SCHEMA_VERSION
        )));
    }

    let current = get_schema_version(conn)?;
    if current == target {
        return Ok(());
    }
    if current > SCHEMA_VERSION {
        return Err(migration_error(format!(
            "database schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    let steps = migrations();
    if target > current {
        for step in steps.iter().filter(|m| m.version > current && m.version <= target) {
            tracing::info!(version = step.version, description = step.description, "Applying migration");
            run_step(conn, step.up, step.version)?;
        }
    } else {
        for step in steps
            .iter()
            .rev()
            .filter(|m| m.version <= current && m.version > target)
        {
            tracing::info!(version = step.version, description = step.description, "Reverting migration");
            run_step(conn, step.down, step.version - 1)?;
        }
    }

    Ok(())
}

fn run_step(
    conn: &Connection,
    step: fn(&Connection) -> StorageResult<()>,
    version: i32,
) -> StorageResult<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| migration_error(format!("failed to begin migration: {}", e)))?;
    step(&tx)?;
    set_schema_version(&tx, version)?;
    tx.commit()
        .map_err(|e| migration_error(format!("failed to commit migration: {}", e)))
}

fn migration_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::MigrationError { message })
}

fn exec(conn: &Connection, sql: &str, what: &str) -> StorageResult<()> {
    conn.execute_batch(sql)
        .map_err(|e| migration_error(format!("Failed to {}: {}", what, e)))
}

/// Get the current schema version; 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    exec(
        conn,
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        "create schema_version table",
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    exec(conn, "DELETE FROM schema_version", "clear schema_version")?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| migration_error(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_documents_v1(conn: &Connection) -> StorageResult<()> {
    exec(
        conn,
        "CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);",
        "create documents table",
    )
}

fn drop_documents_v1(conn: &Connection) -> StorageResult<()> {
    exec(
        conn,
        "DROP INDEX IF EXISTS idx_documents_collection;
        DROP TABLE IF EXISTS documents;",
        "drop documents table",
    )
}

/// SQL literal extracting a top-level or dotted field from `data`.
fn extract_literal(field: &str) -> String {
    format!("json_extract(data, '{}')", super::sql::json_path(field))
}

fn create_unique_indexes_v2(conn: &Connection) -> StorageResult<()> {
    for collection in Collection::ALL {
        for index in collection.unique_indexes() {
            let columns: Vec<String> = index.fields().iter().map(|f| extract_literal(f)).collect();
            let present: Vec<String> = columns
                .iter()
                .map(|c| format!("{c} IS NOT NULL AND {c} <> ''"))
                .collect();
            let sql = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON documents ({columns}) \
                 WHERE collection = '{collection}' AND {present}",
                name = index.name(collection),
                columns = columns.join(", "),
                collection = collection.name(),
                present = present.join(" AND "),
            );
            exec(conn, &sql, &format!("create index {}", index.name(collection)))?;
        }
    }
    Ok(())
}

fn drop_unique_indexes_v2(conn: &Connection) -> StorageResult<()> {
    for collection in Collection::ALL {
        for index in collection.unique_indexes() {
            let name = index.name(collection);
            exec(
                conn,
                &format!("DROP INDEX IF EXISTS {}", name),
                &format!("drop index {}", name),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'uq_%'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_latest() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let expected: usize = Collection::ALL.iter().map(|c| c.unique_indexes().len()).sum();
        assert_eq!(index_count(&conn), expected as i64);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_down_and_up() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        migrate_to(&conn, 1).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
        assert_eq!(index_count(&conn), 0);

        migrate_to(&conn, 0).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);

        migrate_to(&conn, SCHEMA_VERSION).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            migrate_to(&conn, SCHEMA_VERSION + 1),
            Err(StorageError::Backend(BackendError::MigrationError { .. }))
        ));
    }

    #[test]
    fn test_partial_unique_index_ignores_empty_values() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        let insert = |data: &str| {
            conn.execute(
                "INSERT INTO documents (collection, data) VALUES ('users', ?1)",
                [data],
            )
        };
        insert(r#"{"id":"1","username":"","email":"a@x"}"#).unwrap();
        insert(r#"{"id":"2","username":"","email":"b@x"}"#).unwrap();
        let err = insert(r#"{"id":"3","username":"","email":"a@x"}"#).unwrap_err();
        assert!(err.to_string().contains("uq_users_email"));
    }
}
