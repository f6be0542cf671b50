//! SQLite engine implementation.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::core::{BackendKind, Engine, Executor};
use crate::error::{BackendError, StorageError, StorageResult, TransactionError};
use crate::tenant::{Interrupt, RequestContext};

use super::executor::SqliteExecutor;
use super::schema;

/// SQLite engine storing every collection in one `documents` table.
pub struct SqliteEngine {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    path: Option<PathBuf>,
}

impl Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("config", &self.config)
            .field("path", &self.path)
            .field("pool_state", &self.pool.state())
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Number of virtual machine instructions between cancellation checks.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: i32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_progress_interval() -> i32 {
    1000
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            progress_interval: default_progress_interval(),
        }
    }
}

fn connection_failed(message: impl Into<String>) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message: message.into(),
    })
}

impl SqliteEngine {
    /// Creates an in-memory engine with the schema initialised.
    ///
    /// The pool holds a single connection that is never recycled, since every
    /// in-memory connection is a separate database.
    pub fn in_memory() -> StorageResult<Self> {
        let config = SqliteBackendConfig::default();
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(SqliteConnectionManager::memory())
            .map_err(|e| connection_failed(e.to_string()))?;

        let engine = Self {
            pool,
            config,
            path: None,
        };
        engine.init_schema()?;
        Ok(engine)
    }

    /// Opens or creates a file-based database with the schema initialised.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Opens a file-based database with custom configuration.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteBackendConfig) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let enable_wal = config.enable_wal;

        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if enable_wal {
                let _: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_connections))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| connection_failed(e.to_string()))?;

        tracing::info!(path = %path.display(), "Opened SQLite engine");

        let engine = Self {
            pool,
            config,
            path: Some(path),
        };
        engine.init_schema()?;
        Ok(engine)
    }

    /// Brings the schema to the latest version.
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Migrates the schema up or down to `version`.
    pub fn migrate_to(&self, version: i32) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::migrate_to(&conn, version)
    }

    /// Current schema version.
    pub fn schema_version(&self) -> StorageResult<i32> {
        let conn = self.get_connection()?;
        schema::get_schema_version(&conn)
    }

    /// Returns `true` for an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }

    /// The engine configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    fn get_connection(&self) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| connection_failed(e.to_string()))
    }
}

/// Aborts long-running statements once the request is done; removed on drop.
struct InterruptGuard<'a> {
    conn: &'a Connection,
}

impl<'a> InterruptGuard<'a> {
    fn install(conn: &'a Connection, interrupt: Interrupt, interval: i32) -> Self {
        conn.progress_handler(interval, Some(move || interrupt.should_stop()));
        Self { conn }
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

impl Engine for SqliteEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn execute<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>,
    {
        ctx.check()?;
        let conn = self.get_connection()?;
        let _guard = InterruptGuard::install(&conn, ctx.interrupt(), self.config.progress_interval);
        let mut exec = SqliteExecutor::new(&conn, false, ctx.interrupt());
        f(&mut exec)
    }

    fn transaction<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>,
    {
        ctx.check()?;
        let conn = self.get_connection()?;
        let guard = InterruptGuard::install(&conn, ctx.interrupt(), self.config.progress_interval);

        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate).map_err(|e| {
            StorageError::Transaction(TransactionError::StartFailed {
                reason: e.to_string(),
            })
        })?;

        let result = {
            let mut exec = SqliteExecutor::new(&tx, true, ctx.interrupt());
            f(&mut exec)
        };
        // Commit and rollback must not be interrupted.
        drop(guard);

        match result {
            Ok(value) => {
                tx.commit().map_err(|e| {
                    StorageError::Transaction(TransactionError::CommitFailed {
                        reason: e.to_string(),
                    })
                })?;
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Rolling back SQLite transaction");
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Collection;
    use crate::query::Condition;
    use crate::tenant::CancellationToken;
    use serde_json::json;

    #[test]
    fn test_in_memory_engine_is_ready() {
        let engine = SqliteEngine::in_memory().unwrap();
        assert!(engine.is_memory());
        assert_eq!(engine.kind(), BackendKind::Sqlite);
        assert_eq!(engine.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_in_memory_state_survives_calls() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ctx = RequestContext::new();
        engine
            .execute(&ctx, |exec| {
                exec.insert(Collection::Tags, vec![json!({"id": "1", "tenant_id": "t", "name": "a"})])
            })
            .unwrap();
        let count = engine
            .execute(&ctx, |exec| exec.count(Collection::Tags, &Condition::always()))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transaction_rolls_back() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ctx = RequestContext::new();
        let result: StorageResult<()> = engine.transaction(&ctx, |exec| {
            exec.insert(Collection::Tags, vec![json!({"id": "1", "tenant_id": "t", "name": "a"})])?;
            Err(TransactionError::InvalidState.into())
        });
        assert!(result.is_err());
        let count = engine
            .execute(&ctx, |exec| exec.count(Collection::Tags, &Condition::always()))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_duplicate_inside_transaction_keeps_earlier_writes() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ctx = RequestContext::new();
        let outcome = engine
            .transaction(&ctx, |exec| {
                exec.insert(Collection::Tags, vec![json!({"id": "1", "tenant_id": "t", "name": "a"})])?;
                let dup = exec.insert(
                    Collection::Tags,
                    vec![
                        json!({"id": "2", "tenant_id": "t", "name": "b"}),
                        json!({"id": "3", "tenant_id": "t", "name": "a"}),
                    ],
                );
                Ok(dup.is_err())
            })
            .unwrap();
        assert!(outcome);
        let count = engine
            .execute(&ctx, |exec| exec.count(Collection::Tags, &Condition::always()))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_cancelled_context_is_rejected() {
        let engine = SqliteEngine::in_memory().unwrap();
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());
        token.cancel();
        let err = engine
            .execute(&ctx, |exec| exec.count(Collection::Tags, &Condition::always()))
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    #[test]
    fn test_file_database_persists_across_engines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let ctx = RequestContext::new();
        {
            let engine = SqliteEngine::open(&path).unwrap();
            assert!(!engine.is_memory());
            engine
                .execute(&ctx, |exec| {
                    exec.insert(Collection::Tags, vec![json!({"id": "1", "tenant_id": "t", "name": "a"})])
                })
                .unwrap();
        }
        let engine = SqliteEngine::open(&path).unwrap();
        let found = engine
            .execute(&ctx, |exec| exec.find_one(Collection::Tags, &Condition::eq("id", "1")))
            .unwrap();
        assert_eq!(found.unwrap()["name"], "a");
    }
}
