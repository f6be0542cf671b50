//! In-memory engine implementation.

use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::Mutex;
use serde_json::Value;

use crate::backends::eval::{SortKey, apply_update, index_key, matches};
use crate::core::{BackendKind, Collection, Engine, Executor, Update, UpdateResult};
use crate::error::{StorageError, StorageResult};
use crate::query::{Condition, Order, Stage};
use crate::tenant::{Interrupt, RequestContext};

type Database = HashMap<Collection, Vec<Value>>;

/// Engine keeping every collection in a process-local map.
///
/// Calls are serialised by a single mutex, so each closure passed to
/// [`Engine::execute`] observes and mutates a consistent snapshot. A
/// transaction restores the pre-call state when its closure fails.
pub struct MemoryEngine {
    db: Mutex<Database>,
}

impl Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let db = self.db.lock();
        f.debug_struct("MemoryEngine")
            .field("collections", &db.len())
            .field("documents", &db.values().map(Vec::len).sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        tracing::debug!("Creating in-memory engine");
        Self {
            db: Mutex::new(HashMap::new()),
        }
    }
}

impl Engine for MemoryEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn execute<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>,
    {
        ctx.check()?;
        let mut db = self.db.lock();
        let mut exec = MemoryExecutor {
            db: &mut *db,
            interrupt: ctx.interrupt(),
        };
        f(&mut exec)
    }

    fn transaction<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Executor) -> StorageResult<R>,
    {
        ctx.check()?;
        let mut db = self.db.lock();
        let snapshot = db.clone();
        let result = {
            let mut exec = MemoryExecutor {
                db: &mut *db,
                interrupt: ctx.interrupt(),
            };
            f(&mut exec)
        };
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Rolling back memory transaction");
            *db = snapshot;
        }
        result
    }
}

struct MemoryExecutor<'a> {
    db: &'a mut Database,
    interrupt: Interrupt,
}

impl MemoryExecutor<'_> {
    fn check(&self) -> StorageResult<()> {
        if self.interrupt.should_stop() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn docs(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.db.entry(collection).or_default()
    }
}

/// Rejects `candidate` if it collides with any document other than `skip`.
fn check_unique(
    collection: Collection,
    docs: &[Value],
    skip: Option<usize>,
    candidate: &Value,
) -> StorageResult<()> {
    for index in collection.unique_indexes() {
        let Some(key) = index_key(candidate, index) else {
            continue;
        };
        let collides = docs
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .any(|(_, doc)| index_key(doc, index).as_ref() == Some(&key));
        if collides {
            return Err(StorageError::duplicate(
                collection.entity(),
                vec![index.field.to_string()],
            ));
        }
    }
    Ok(())
}

impl Executor for MemoryExecutor<'_> {
    fn find(&mut self, collection: Collection, stages: &[Stage]) -> StorageResult<Vec<Value>> {
        self.check()?;
        let docs = self.docs(collection);
        let mut selected: Vec<&Value> = docs.iter().collect();

        for stage in stages {
            match stage {
                Stage::Match(condition) => selected.retain(|doc| matches(doc, condition)),
                Stage::Sort { field, order } => {
                    selected.sort_by(|a, b| {
                        let ordering = SortKey::of(a, field).cmp(&SortKey::of(b, field));
                        match order {
                            Order::Asc => ordering,
                            Order::Desc => ordering.reverse(),
                        }
                    });
                }
                Stage::Skip(n) => {
                    let n = usize::try_from(*n).unwrap_or(usize::MAX).min(selected.len());
                    selected.drain(..n);
                }
                Stage::Limit(n) => {
                    selected.truncate(usize::try_from(*n).unwrap_or(usize::MAX));
                }
            }
        }

        Ok(selected.into_iter().cloned().collect())
    }

    fn count(&mut self, collection: Collection, condition: &Condition) -> StorageResult<u64> {
        self.check()?;
        Ok(self
            .docs(collection)
            .iter()
            .filter(|doc| matches(doc, condition))
            .count() as u64)
    }

    fn insert(&mut self, collection: Collection, documents: Vec<Value>) -> StorageResult<()> {
        self.check()?;
        let docs = self.docs(collection);
        let existing = docs.len();
        for doc in documents {
            if let Err(e) = check_unique(collection, docs, None, &doc) {
                docs.truncate(existing);
                return Err(e);
            }
            docs.push(doc);
        }
        Ok(())
    }

    fn update(
        &mut self,
        collection: Collection,
        condition: &Condition,
        update: &Update,
        multi: bool,
    ) -> StorageResult<UpdateResult> {
        self.check()?;
        let docs = self.docs(collection);
        let targets: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| matches(doc, condition))
            .map(|(i, _)| i)
            .take(if multi { usize::MAX } else { 1 })
            .collect();

        let mut result = UpdateResult::default();
        for i in targets {
            result.matched += 1;
            let mut doc = docs[i].clone();
            if apply_update(&mut doc, update)? {
                check_unique(collection, docs, Some(i), &doc)?;
                docs[i] = doc;
                result.modified += 1;
            }
        }
        Ok(result)
    }

    fn delete(
        &mut self,
        collection: Collection,
        condition: &Condition,
        multi: bool,
    ) -> StorageResult<u64> {
        self.check()?;
        let docs = self.docs(collection);
        let mut deleted = 0u64;
        docs.retain(|doc| {
            if (multi || deleted == 0) && matches(doc, condition) {
                deleted += 1;
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    fn clear(&mut self, collection: Collection) -> StorageResult<()> {
        self.check()?;
        self.db.remove(&collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransactionError;
    use serde_json::json;

    fn tag(id: &str, tenant: &str, name: &str) -> Value {
        json!({"id": id, "tenant_id": tenant, "name": name})
    }

    #[test]
    fn test_insert_find_sort_page() {
        let engine = MemoryEngine::new();
        let ctx = RequestContext::new();
        engine
            .execute(&ctx, |exec| {
                exec.insert(
                    Collection::Tags,
                    vec![tag("1", "t", "b"), tag("2", "t", "a"), tag("3", "t", "c")],
                )
            })
            .unwrap();

        let names: Vec<Value> = engine
            .execute(&ctx, |exec| {
                exec.find(
                    Collection::Tags,
                    &[
                        Stage::Sort {
                            field: "name".into(),
                            order: Order::Asc,
                        },
                        Stage::Skip(1),
                        Stage::Limit(5),
                    ],
                )
            })
            .unwrap()
            .into_iter()
            .map(|d| d["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("b"), json!("c")]);
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let engine = MemoryEngine::new();
        let ctx = RequestContext::new();
        let err = engine
            .execute(&ctx, |exec| {
                exec.insert(Collection::Tags, vec![tag("1", "t", "a")])?;
                exec.insert(Collection::Tags, vec![tag("2", "t", "a")])
            })
            .unwrap_err();
        assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));

        engine
            .execute(&ctx, |exec| exec.insert(Collection::Tags, vec![tag("3", "other", "a")]))
            .unwrap();
    }

    #[test]
    fn test_update_single_and_multi() {
        let engine = MemoryEngine::new();
        let ctx = RequestContext::new();
        let (single, multi) = engine
            .execute(&ctx, |exec| {
                exec.insert(Collection::Tags, vec![tag("1", "t", "a"), tag("2", "t", "b")])?;
                let update = Update::new().set("color", "red");
                let single = exec.update(Collection::Tags, &Condition::eq("tenant_id", "t"), &update, false)?;
                let multi = exec.update(Collection::Tags, &Condition::eq("tenant_id", "t"), &update, true)?;
                Ok((single, multi))
            })
            .unwrap();
        assert_eq!(single, UpdateResult { matched: 1, modified: 1 });
        assert_eq!(multi, UpdateResult { matched: 2, modified: 1 });
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let engine = MemoryEngine::new();
        let ctx = RequestContext::new();
        let result: StorageResult<()> = engine.transaction(&ctx, |exec| {
            exec.insert(Collection::Tags, vec![tag("1", "t", "a")])?;
            Err(TransactionError::InvalidState.into())
        });
        assert!(result.is_err());

        let count = engine
            .execute(&ctx, |exec| exec.count(Collection::Tags, &Condition::always()))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_cancelled_context_is_rejected() {
        let engine = MemoryEngine::new();
        let ctx = RequestContext::new();
        ctx.cancellation().cancel();
        let err = engine
            .execute(&ctx, |exec| exec.count(Collection::Tags, &Condition::always()))
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    #[test]
    fn test_delete_first_or_all() {
        let engine = MemoryEngine::new();
        let ctx = RequestContext::new();
        let (first, rest) = engine
            .execute(&ctx, |exec| {
                exec.insert(
                    Collection::Tags,
                    vec![tag("1", "t", "a"), tag("2", "t", "b"), tag("3", "t", "c")],
                )?;
                let all = Condition::eq("tenant_id", "t");
                Ok((
                    exec.delete(Collection::Tags, &all, false)?,
                    exec.delete(Collection::Tags, &all, true)?,
                ))
            })
            .unwrap();
        assert_eq!((first, rest), (1, 2));
    }
}
