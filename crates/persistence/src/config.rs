//! Engine selection from configuration.
//!
//! ```
//! use fleet_persistence::config::EngineConfig;
//!
//! let config: EngineConfig = serde_json::from_str(r#"{"type": "memory"}"#).unwrap();
//! let engine = config.open().unwrap();
//! assert_eq!(engine.to_string(), "memory");
//! ```

use std::fmt;
#[cfg(feature = "sqlite")]
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backends::memory::MemoryEngine;
#[cfg(feature = "sqlite")]
use crate::backends::sqlite::{SqliteBackendConfig, SqliteEngine};
use crate::core::{BackendKind, Engine, Executor};
use crate::error::StorageResult;
use crate::tenant::RequestContext;

/// Which engine to open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineConfig {
    /// Process-local storage.
    #[default]
    Memory,

    /// SQLite; in-memory when `path` is unset.
    #[cfg(feature = "sqlite")]
    Sqlite {
        /// Database file.
        #[serde(default)]
        path: Option<PathBuf>,
        /// Pool and connection settings.
        #[serde(flatten)]
        config: SqliteBackendConfig,
    },
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineConfig::Memory => write!(f, "memory"),
            #[cfg(feature = "sqlite")]
            EngineConfig::Sqlite { path: Some(path), .. } => write!(f, "sqlite:{}", path.display()),
            #[cfg(feature = "sqlite")]
            EngineConfig::Sqlite { path: None, .. } => write!(f, "sqlite::memory:"),
        }
    }
}

impl EngineConfig {
    /// Opens the configured engine.
    pub fn open(&self) -> StorageResult<AnyEngine> {
        tracing::info!(engine = %self, "Opening storage engine");
        match self {
            EngineConfig::Memory => Ok(AnyEngine::Memory(MemoryEngine::new())),
            #[cfg(feature = "sqlite")]
            EngineConfig::Sqlite { path: None, .. } => Ok(AnyEngine::Sqlite(SqliteEngine::in_memory()?)),
            #[cfg(feature = "sqlite")]
            EngineConfig::Sqlite {
                path: Some(path),
                config,
            } => Ok(AnyEngine::Sqlite(SqliteEngine::with_config(path, config.clone())?)),
        }
    }
}

/// An engine chosen at runtime.
#[derive(Debug)]
pub enum AnyEngine {
    /// See [`MemoryEngine`].
    Memory(MemoryEngine),
    /// See [`SqliteEngine`].
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteEngine),
}

impl fmt::Display for AnyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl Engine for AnyEngine {
    fn kind(&self) -> BackendKind {
        match self {
            AnyEngine::Memory(engine) => engine.kind(),
            #[cfg(feature = "sqlite")]
            AnyEngine::Sqlite(engine) => engine.kind(),
        }
    }

    fn execute<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>,
    {
        match self {
            AnyEngine::Memory(engine) => engine.execute(ctx, f),
            #[cfg(feature = "sqlite")]
            AnyEngine::Sqlite(engine) => engine.execute(ctx, f),
        }
    }

    fn transaction<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>,
    {
        match self {
            AnyEngine::Memory(engine) => engine.transaction(ctx, f),
            #[cfg(feature = "sqlite")]
            AnyEngine::Sqlite(engine) => engine.transaction(ctx, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        assert_eq!(EngineConfig::default(), EngineConfig::Memory);
        let engine = EngineConfig::default().open().unwrap();
        assert_eq!(engine.kind(), BackendKind::Memory);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_config_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"type": "sqlite", "busy_timeout_ms": 100}"#).unwrap();
        match &config {
            EngineConfig::Sqlite { path, config } => {
                assert!(path.is_none());
                assert_eq!(config.busy_timeout_ms, 100);
                assert_eq!(config.max_connections, 10);
            }
            other => panic!("unexpected config {other:?}"),
        }
        assert_eq!(config.to_string(), "sqlite::memory:");
        assert_eq!(config.open().unwrap().kind(), BackendKind::Sqlite);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_file_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let config = EngineConfig::Sqlite {
            path: Some(path.clone()),
            config: SqliteBackendConfig::default(),
        };
        let engine = config.open().unwrap();
        assert_eq!(engine.to_string(), "sqlite");
        assert!(path.exists());
    }
}
