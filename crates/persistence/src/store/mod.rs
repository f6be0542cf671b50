//! The document store.
//!
//! [`DocumentStore`] implements every capability trait of
//! [`core`](crate::core) on top of any [`Engine`]. Entity logic lives on
//! [`StoreHandle`], a synchronous view over one engine call: each async
//! store method opens an engine call (or a transaction), runs the handle
//! method inside it, then reports counter deltas to the optional
//! [`CounterCache`] once the writes are committed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use fleet_persistence::backends::memory::MemoryEngine;
//! use fleet_persistence::core::TagStore;
//! use fleet_persistence::counter::MemoryCounterCache;
//! use fleet_persistence::models::Tag;
//! use fleet_persistence::store::DocumentStore;
//! use fleet_persistence::tenant::{RequestContext, TenantId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DocumentStore::builder(MemoryEngine::new())
//!     .with_counter_cache(Arc::new(MemoryCounterCache::new()))
//!     .build();
//!
//! let ctx = RequestContext::for_tenant("acme");
//! let tag = store.tag_create(&ctx, Tag::new(TenantId::new("acme"), "prod")).await?;
//! assert!(!tag.id.is_empty());
//! # Ok(())
//! # }
//! ```

mod device;
mod keys;
mod misc;
mod namespace;
mod session;
mod tag;
mod user;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Collection, Engine, Executor, MaintenanceStore, TransactionStore, Update, UpdateResult};
use crate::counter::CounterCache;
use crate::error::{OperationContext, StorageError, StorageResult};
use crate::fixtures::Fixture;
use crate::models::{DeviceStatus, Document};
use crate::query::{Condition, QueryOption, QueryPlan, Resolver, Stage, scope_condition};
use crate::tenant::RequestContext;

/// Store over an engine, implementing every capability trait.
#[derive(Debug)]
pub struct DocumentStore<E: Engine> {
    engine: Arc<E>,
    counters: Option<Arc<dyn CounterCache>>,
}

impl<E: Engine> Clone for DocumentStore<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            counters: self.counters.clone(),
        }
    }
}

/// Builder for [`DocumentStore`].
#[derive(Debug)]
pub struct StoreBuilder<E: Engine> {
    engine: Arc<E>,
    counters: Option<Arc<dyn CounterCache>>,
}

impl<E: Engine> StoreBuilder<E> {
    /// Starts from an engine.
    pub fn new(engine: E) -> Self {
        Self::shared(Arc::new(engine))
    }

    /// Starts from an engine shared with other stores.
    pub fn shared(engine: Arc<E>) -> Self {
        Self {
            engine,
            counters: None,
        }
    }

    /// Reports device counter changes to `cache`.
    pub fn with_counter_cache(mut self, cache: Arc<dyn CounterCache>) -> Self {
        self.counters = Some(cache);
        self
    }

    /// Builds the store.
    pub fn build(self) -> DocumentStore<E> {
        tracing::debug!(
            engine = %self.engine.kind(),
            counters = self.counters.is_some(),
            "Building document store"
        );
        DocumentStore {
            engine: self.engine,
            counters: self.counters,
        }
    }
}

impl<E: Engine> DocumentStore<E> {
    /// A store without collaborators.
    pub fn new(engine: E) -> Self {
        StoreBuilder::new(engine).build()
    }

    /// Starts a [`StoreBuilder`].
    pub fn builder(engine: E) -> StoreBuilder<E> {
        StoreBuilder::new(engine)
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs handle logic as standalone engine calls.
    pub(crate) async fn run<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        R: Send,
        F: FnOnce(&mut StoreHandle<'_>) -> StorageResult<R> + Send,
    {
        let (value, deltas) = self.engine.execute(ctx, |exec| {
            let mut handle = StoreHandle::new(exec, ctx);
            let value = f(&mut handle)?;
            Ok((value, handle.deltas))
        })?;
        self.flush(deltas).await;
        Ok(value)
    }

    /// Runs handle logic in one transaction.
    pub(crate) async fn run_in_transaction<R, F>(
        &self,
        ctx: &RequestContext,
        f: F,
    ) -> StorageResult<R>
    where
        R: Send,
        F: FnOnce(&mut StoreHandle<'_>) -> StorageResult<R> + Send,
    {
        let (value, deltas) = self.engine.transaction(ctx, |exec| {
            let mut handle = StoreHandle::new(exec, ctx);
            let value = f(&mut handle)?;
            Ok((value, handle.deltas))
        })?;
        self.flush(deltas).await;
        Ok(value)
    }

    async fn flush(&self, deltas: Vec<CounterDelta>) {
        let Some(cache) = &self.counters else {
            return;
        };
        for delta in merge_deltas(deltas) {
            let key = delta.status.counter_field();
            let result = if delta.delta > 0 {
                cache
                    .increase_counter(&delta.tenant, key, delta.delta.unsigned_abs())
                    .await
            } else {
                cache
                    .decrease_counter(&delta.tenant, key, delta.delta.unsigned_abs())
                    .await
            };
            if let Err(e) = result {
                tracing::warn!(tenant = %delta.tenant, key, error = %e, "Counter update failed");
            }
        }
    }
}

/// A pending change to a fleet-wide device counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CounterDelta {
    tenant: String,
    status: DeviceStatus,
    delta: i64,
}

fn merge_deltas(deltas: Vec<CounterDelta>) -> Vec<CounterDelta> {
    let mut merged: Vec<CounterDelta> = Vec::new();
    for delta in deltas {
        match merged
            .iter_mut()
            .find(|d| d.tenant == delta.tenant && d.status == delta.status)
        {
            Some(existing) => existing.delta += delta.delta,
            None => merged.push(delta),
        }
    }
    merged.retain(|d| d.delta != 0);
    merged
}

/// Synchronous store operations bound to one engine call.
///
/// Obtained through [`TransactionStore::with_transaction`]; every write made
/// through a handle commits or rolls back together.
pub struct StoreHandle<'a> {
    exec: &'a mut dyn Executor,
    ctx: &'a RequestContext,
    deltas: Vec<CounterDelta>,
}

impl Debug for StoreHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("ctx", &self.ctx)
            .field("deltas", &self.deltas)
            .finish_non_exhaustive()
    }
}

impl<'a> StoreHandle<'a> {
    pub(crate) fn new(exec: &'a mut dyn Executor, ctx: &'a RequestContext) -> Self {
        Self {
            exec,
            ctx,
            deltas: Vec::new(),
        }
    }

    /// The request context of the enclosing call.
    pub fn context(&self) -> &RequestContext {
        self.ctx
    }

    fn record_counter(&mut self, tenant: &str, status: DeviceStatus, delta: i64) {
        self.deltas.push(CounterDelta {
            tenant: tenant.to_string(),
            status,
            delta,
        });
    }

    /// `condition` narrowed to the context's tenant for tenant-owned collections.
    fn scoped(&self, collection: Collection, condition: Condition) -> Condition {
        Condition::all(scope_condition(self.ctx, collection).into_iter().chain([condition]))
    }

    /// `condition` narrowed to an explicit tenant, on top of the context's.
    fn in_tenant(&self, collection: Collection, tenant_id: &str, condition: Condition) -> Condition {
        let field = collection.tenant_field().unwrap_or("tenant_id");
        self.scoped(
            collection,
            Condition::all([Condition::eq(field, tenant_id), condition]),
        )
    }

    fn plan(&self, collection: Collection, opts: &[QueryOption]) -> StorageResult<QueryPlan> {
        Ok(QueryPlan::build(self.ctx, collection, opts)?)
    }

    /// Runs a plan; the total ignores pagination.
    fn list_plan<T: Document>(&mut self, plan: &QueryPlan) -> StorageResult<(Vec<T>, u64)> {
        let docs = self.exec.find(T::COLLECTION, &plan.stages())?;
        let total = if plan.is_paginated() {
            self.exec.count(T::COLLECTION, &plan.condition())?
        } else {
            docs.len() as u64
        };
        let items = docs
            .into_iter()
            .map(T::from_document)
            .collect::<StorageResult<Vec<T>>>()?;
        Ok((items, total))
    }

    fn resolve_plan<T: Document>(
        &mut self,
        resolver: impl Resolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<(T, QueryPlan)> {
        let plan = self
            .plan(T::COLLECTION, opts)?
            .and(resolver.condition(value));
        let found = self.find_one::<T>(plan.condition())?;
        match found {
            Some(model) => Ok((model, plan)),
            None => Err(StorageError::not_found(T::COLLECTION.entity(), value)),
        }
    }

    fn find_one<T: Document>(&mut self, condition: Condition) -> StorageResult<Option<T>> {
        self.exec
            .find_one(T::COLLECTION, &condition)?
            .map(T::from_document)
            .transpose()
    }

    fn find_all<T: Document>(&mut self, stages: &[Stage]) -> StorageResult<Vec<T>> {
        self.exec
            .find(T::COLLECTION, stages)?
            .into_iter()
            .map(T::from_document)
            .collect()
    }

    fn get<T: Document>(&mut self, condition: Condition, id: &str) -> StorageResult<T> {
        self.find_one::<T>(condition)?
            .ok_or_else(|| StorageError::not_found(T::COLLECTION.entity(), id))
    }

    fn insert<T: Document>(&mut self, model: &T) -> StorageResult<()> {
        let document = model.to_document()?;
        self.check_owner(T::COLLECTION, &document)?;
        self.exec.insert(T::COLLECTION, vec![document])
    }

    /// A tenant context may only write documents owned by its own tenant.
    /// Anything else is outside its scope and reported as a missing namespace.
    fn check_owner(&self, collection: Collection, document: &Value) -> StorageResult<()> {
        let (Some(field), Some(tenant)) = (collection.tenant_field(), self.ctx.tenant()) else {
            return Ok(());
        };
        match document.get(field).and_then(Value::as_str) {
            Some(owner) if owner == tenant.as_str() => Ok(()),
            owner => {
                tracing::debug!(%collection, %tenant, ?owner, "Rejected write outside the context tenant");
                Err(StorageError::not_found("namespace", owner.unwrap_or_default()))
            }
        }
    }

    /// Updates exactly one document, failing with not-found when none matches.
    fn update_one(
        &mut self,
        collection: Collection,
        condition: &Condition,
        update: &Update,
        id: &str,
    ) -> StorageResult<UpdateResult> {
        let result = self.exec.update(collection, condition, update, false)?;
        if result.matched == 0 {
            return Err(StorageError::not_found(collection.entity(), id));
        }
        Ok(result)
    }

    /// Deletes exactly one document, failing with not-found when none matches.
    fn delete_one(&mut self, collection: Collection, condition: &Condition, id: &str) -> StorageResult<()> {
        if self.exec.delete(collection, condition, false)? == 0 {
            return Err(StorageError::not_found(collection.entity(), id));
        }
        Ok(())
    }
}

/// Generates an identifier for documents created without one.
fn generate_id(id: &mut String) {
    if id.is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

#[async_trait]
impl<E: Engine> TransactionStore for DocumentStore<E> {
    async fn with_transaction<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut StoreHandle<'_>) -> StorageResult<R> + Send,
    {
        self.run_in_transaction(ctx, f).await
    }
}

#[async_trait]
impl<E: Engine> MaintenanceStore for DocumentStore<E> {
    async fn load_fixtures(&self, ctx: &RequestContext, fixtures: &[Fixture]) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| {
            for fixture in fixtures {
                tracing::debug!(
                    fixture = %fixture.name,
                    collection = %fixture.collection,
                    documents = fixture.documents.len(),
                    "Loading fixture"
                );
                h.exec
                    .insert(fixture.collection, fixture.documents.clone())?;
            }
            Ok(())
        })
        .await
        .in_operation("fixture", "load")
    }

    async fn wipe(&self, ctx: &RequestContext) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| {
            for collection in Collection::ALL {
                h.exec.clear(collection)?;
            }
            Ok(())
        })
        .await
        .in_operation("store", "wipe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(tenant: &str, status: DeviceStatus, delta: i64) -> CounterDelta {
        CounterDelta {
            tenant: tenant.to_string(),
            status,
            delta,
        }
    }

    #[test]
    fn test_merge_deltas_sums_and_drops_zero() {
        let merged = merge_deltas(vec![
            delta("t", DeviceStatus::Pending, 1),
            delta("t", DeviceStatus::Accepted, 1),
            delta("t", DeviceStatus::Pending, -1),
            delta("u", DeviceStatus::Accepted, 2),
        ]);
        assert_eq!(
            merged,
            vec![
                delta("t", DeviceStatus::Accepted, 1),
                delta("u", DeviceStatus::Accepted, 2),
            ]
        );
    }

    #[test]
    fn test_generate_id_keeps_existing() {
        let mut id = "given".to_string();
        generate_id(&mut id);
        assert_eq!(id, "given");

        let mut id = String::new();
        generate_id(&mut id);
        assert_eq!(id.len(), 36);
    }
}
