//! API keys, public keys and private keys.

use async_trait::async_trait;
use chrono::Utc;

use super::{DocumentStore, StoreHandle};
use crate::core::{ApiKeyStore, Collection, Engine, PrivateKeyStore, PublicKeyStore, Update};
use crate::error::{OperationContext, StorageResult};
use crate::models::{ApiKey, ApiKeyChanges, PrivateKey, PublicKey, PublicKeyChanges};
use crate::query::{
    ApiKeyConflicts, ApiKeyResolver, Condition, Conflicts, PublicKeyResolver, QueryOption,
    detect_conflicts, scope_condition,
};
use crate::tenant::RequestContext;

impl StoreHandle<'_> {
    /// Creates an API key.
    pub fn api_key_create(&mut self, key: ApiKey) -> StorageResult<ApiKey> {
        self.insert(&key)?;
        Ok(key)
    }

    /// Resolves exactly one API key.
    pub fn api_key_resolve(
        &mut self,
        resolver: ApiKeyResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<ApiKey> {
        let (key, _) = self.resolve_plan::<ApiKey>(resolver, value, opts)?;
        Ok(key)
    }

    /// Reports which probe fields collide with other keys of the tenant.
    pub fn api_key_conflicts(&mut self, probe: &ApiKeyConflicts) -> StorageResult<Conflicts> {
        let scope = scope_condition(self.ctx, Collection::ApiKeys);
        detect_conflicts(&mut *self.exec, scope, probe)
    }

    /// Lists API keys.
    pub fn api_key_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<ApiKey>, u64)> {
        let plan = self.plan(Collection::ApiKeys, opts)?;
        self.list_plan::<ApiKey>(&plan)
    }

    /// Applies changes to an API key.
    pub fn api_key_update(&mut self, id: &str, changes: &ApiKeyChanges) -> StorageResult<()> {
        let condition = self.scoped(Collection::ApiKeys, Condition::eq("id", id));
        let mut update = Update::new().set_opt("name", changes.name.clone());
        if let Some(role) = changes.role {
            update = update.set("role", serde_json::to_value(role)?);
        }
        if update.is_empty() {
            self.get::<ApiKey>(condition, id)?;
            return Ok(());
        }
        let update = update.set("updated_at", Utc::now().timestamp_millis());
        self.update_one(Collection::ApiKeys, &condition, &update, id)?;
        Ok(())
    }

    /// Deletes an API key.
    pub fn api_key_delete(&mut self, id: &str) -> StorageResult<()> {
        let condition = self.scoped(Collection::ApiKeys, Condition::eq("id", id));
        self.delete_one(Collection::ApiKeys, &condition, id)
    }

    /// Lists public keys.
    pub fn public_key_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<PublicKey>, u64)> {
        let plan = self.plan(Collection::PublicKeys, opts)?;
        self.list_plan::<PublicKey>(&plan)
    }

    /// Resolves exactly one public key.
    pub fn public_key_resolve(
        &mut self,
        resolver: PublicKeyResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<PublicKey> {
        let (key, _) = self.resolve_plan::<PublicKey>(resolver, value, opts)?;
        Ok(key)
    }

    /// Creates a public key.
    pub fn public_key_create(&mut self, key: PublicKey) -> StorageResult<PublicKey> {
        self.insert(&key)?;
        Ok(key)
    }

    /// Applies changes and returns the updated key.
    pub fn public_key_update(
        &mut self,
        fingerprint: &str,
        changes: &PublicKeyChanges,
    ) -> StorageResult<PublicKey> {
        let condition = self.scoped(Collection::PublicKeys, Condition::eq("fingerprint", fingerprint));
        let mut update = Update::new()
            .set_opt("name", changes.name.clone())
            .set_opt("username", changes.username.clone());
        if let Some(filter) = &changes.filter {
            update = update.set("filter", serde_json::to_value(filter)?);
        }
        if !update.is_empty() {
            self.update_one(Collection::PublicKeys, &condition, &update, fingerprint)?;
        }
        self.get::<PublicKey>(condition, fingerprint)
    }

    /// Deletes a public key.
    pub fn public_key_delete(&mut self, fingerprint: &str) -> StorageResult<()> {
        let condition = self.scoped(Collection::PublicKeys, Condition::eq("fingerprint", fingerprint));
        self.delete_one(Collection::PublicKeys, &condition, fingerprint)
    }

    /// Stores a private key.
    pub fn private_key_create(&mut self, key: PrivateKey) -> StorageResult<()> {
        self.insert(&key)
    }

    /// Fetches a private key by fingerprint.
    pub fn private_key_get(&mut self, fingerprint: &str) -> StorageResult<PrivateKey> {
        self.get::<PrivateKey>(Condition::eq("fingerprint", fingerprint), fingerprint)
    }
}

#[async_trait]
impl<E: Engine> ApiKeyStore for DocumentStore<E> {
    async fn api_key_create(&self, ctx: &RequestContext, key: ApiKey) -> StorageResult<ApiKey> {
        self.run(ctx, move |h| h.api_key_create(key))
            .await
            .in_operation("api key", "create")
    }

    async fn api_key_resolve(
        &self,
        ctx: &RequestContext,
        resolver: ApiKeyResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<ApiKey> {
        self.run(ctx, |h| h.api_key_resolve(resolver, value, opts))
            .await
            .in_operation("api key", "resolve")
    }

    async fn api_key_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &ApiKeyConflicts,
    ) -> StorageResult<Conflicts> {
        self.run(ctx, |h| h.api_key_conflicts(probe))
            .await
            .in_operation("api key", "check conflicts")
    }

    async fn api_key_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<ApiKey>, u64)> {
        self.run(ctx, |h| h.api_key_list(opts))
            .await
            .in_operation("api key", "list")
    }

    async fn api_key_update(
        &self,
        ctx: &RequestContext,
        id: &str,
        changes: &ApiKeyChanges,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.api_key_update(id, changes))
            .await
            .in_operation("api key", "update")
    }

    async fn api_key_delete(&self, ctx: &RequestContext, id: &str) -> StorageResult<()> {
        self.run(ctx, |h| h.api_key_delete(id))
            .await
            .in_operation("api key", "delete")
    }
}

#[async_trait]
impl<E: Engine> PublicKeyStore for DocumentStore<E> {
    async fn public_key_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<PublicKey>, u64)> {
        self.run(ctx, |h| h.public_key_list(opts))
            .await
            .in_operation("public key", "list")
    }

    async fn public_key_resolve(
        &self,
        ctx: &RequestContext,
        resolver: PublicKeyResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<PublicKey> {
        self.run(ctx, |h| h.public_key_resolve(resolver, value, opts))
            .await
            .in_operation("public key", "resolve")
    }

    async fn public_key_create(&self, ctx: &RequestContext, key: PublicKey) -> StorageResult<PublicKey> {
        self.run(ctx, move |h| h.public_key_create(key))
            .await
            .in_operation("public key", "create")
    }

    async fn public_key_update(
        &self,
        ctx: &RequestContext,
        fingerprint: &str,
        changes: &PublicKeyChanges,
    ) -> StorageResult<PublicKey> {
        self.run(ctx, |h| h.public_key_update(fingerprint, changes))
            .await
            .in_operation("public key", "update")
    }

    async fn public_key_delete(&self, ctx: &RequestContext, fingerprint: &str) -> StorageResult<()> {
        self.run(ctx, |h| h.public_key_delete(fingerprint))
            .await
            .in_operation("public key", "delete")
    }
}

#[async_trait]
impl<E: Engine> PrivateKeyStore for DocumentStore<E> {
    async fn private_key_create(&self, ctx: &RequestContext, key: PrivateKey) -> StorageResult<()> {
        self.run(ctx, move |h| h.private_key_create(key))
            .await
            .in_operation("private key", "create")
    }

    async fn private_key_get(&self, ctx: &RequestContext, fingerprint: &str) -> StorageResult<PrivateKey> {
        self.run(ctx, |h| h.private_key_get(fingerprint))
            .await
            .in_operation("private key", "get")
    }
}
