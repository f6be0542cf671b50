//! Storage engine abstraction.
//!
//! An [`Engine`] owns the physical storage. Store logic never talks to it
//! directly; it runs closures against an [`Executor`], either as standalone
//! calls ([`Engine::execute`]) or inside one atomic unit
//! ([`Engine::transaction`]). Executors are synchronous, so no lock or
//! connection is ever held across an `.await`.

use std::fmt::Debug;

use serde_json::Value;

use super::collection::Collection;
use super::update::{Update, UpdateResult};
use crate::error::StorageResult;
use crate::query::{Condition, Stage};
use crate::tenant::RequestContext;

/// Identifies the type of storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Process-local maps; nothing survives a restart.
    Memory,
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Document operations available inside an engine call.
///
/// Every write is atomic per document. Unique indexes declared by
/// [`Collection::unique_indexes`] are enforced on insert and update and
/// reported as [`ResourceError::Duplicate`](crate::error::ResourceError::Duplicate).
pub trait Executor {
    /// Runs a stage pipeline and returns the resulting documents.
    fn find(&mut self, collection: Collection, stages: &[Stage]) -> StorageResult<Vec<Value>>;

    /// Counts documents matching a condition.
    fn count(&mut self, collection: Collection, condition: &Condition) -> StorageResult<u64>;

    /// Inserts documents. Either all are inserted or none.
    fn insert(&mut self, collection: Collection, documents: Vec<Value>) -> StorageResult<()>;

    /// Applies an update to the first (or every, with `multi`) matching document.
    fn update(
        &mut self,
        collection: Collection,
        condition: &Condition,
        update: &Update,
        multi: bool,
    ) -> StorageResult<UpdateResult>;

    /// Deletes the first (or every, with `multi`) matching document.
    fn delete(
        &mut self,
        collection: Collection,
        condition: &Condition,
        multi: bool,
    ) -> StorageResult<u64>;

    /// Removes every document of a collection.
    fn clear(&mut self, collection: Collection) -> StorageResult<()>;

    /// Convenience: the first document of a filtered pipeline.
    fn find_one(
        &mut self,
        collection: Collection,
        condition: &Condition,
    ) -> StorageResult<Option<Value>> {
        let mut docs = self.find(
            collection,
            &[Stage::Match(condition.clone()), Stage::Limit(1)],
        )?;
        Ok(if docs.is_empty() { None } else { Some(docs.swap_remove(0)) })
    }
}

/// A storage engine.
pub trait Engine: Debug + Send + Sync + 'static {
    /// The engine type.
    fn kind(&self) -> BackendKind;

    /// Runs `f` against the engine. Each write inside is individually atomic.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`](crate::error::StorageError::Cancelled)
    /// when the context is done before or during the call.
    fn execute<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>;

    /// Runs `f` as one atomic unit: an error from `f` rolls back every write.
    ///
    /// # Errors
    ///
    /// * [`TransactionError::StartFailed`](crate::error::TransactionError::StartFailed)
    ///   if the transaction cannot be opened.
    /// * [`TransactionError::CommitFailed`](crate::error::TransactionError::CommitFailed)
    ///   if `f` succeeds but the commit does not.
    /// * Whatever `f` returns, unchanged.
    fn transaction<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Memory.to_string(), "memory");
        assert_eq!(BackendKind::Sqlite.to_string(), "sqlite");
        assert_eq!(BackendKind::Custom("redis").to_string(), "redis");
    }
}
