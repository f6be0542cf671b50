//! Instance settings and tunnels.

use async_trait::async_trait;

use super::{DocumentStore, StoreHandle};
use crate::core::{Collection, Engine, SystemStore, TunnelStore, Update};
use crate::error::{OperationContext, StorageResult};
use crate::models::{System, Tunnel};
use crate::query::{Condition, QueryOption};
use crate::tenant::RequestContext;

impl StoreHandle<'_> {
    /// The stored settings, or the defaults when none were saved.
    pub fn system_get(&mut self) -> StorageResult<System> {
        Ok(self
            .find_one::<System>(Condition::always())?
            .unwrap_or_default())
    }

    /// Replaces the stored settings.
    pub fn system_set(&mut self, system: &System) -> StorageResult<()> {
        self.exec.clear(Collection::System)?;
        self.insert(system)
    }

    /// Creates a tunnel.
    pub fn tunnel_create(&mut self, tunnel: Tunnel) -> StorageResult<Tunnel> {
        self.insert(&tunnel)?;
        Ok(tunnel)
    }

    /// Lists tunnels.
    pub fn tunnel_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<Tunnel>, u64)> {
        let plan = self.plan(Collection::Tunnels, opts)?;
        self.list_plan::<Tunnel>(&plan)
    }

    /// Deletes a tunnel by address.
    pub fn tunnel_delete(&mut self, address: &str) -> StorageResult<()> {
        let condition = self.scoped(Collection::Tunnels, Condition::eq("address", address));
        self.delete_one(Collection::Tunnels, &condition, address)
    }

    /// Rewrites the device uid of every tunnel of `old_uid`.
    pub fn tunnel_update_device_uid(&mut self, old_uid: &str, new_uid: &str) -> StorageResult<u64> {
        let condition = self.scoped(Collection::Tunnels, Condition::eq("device_uid", old_uid));
        let result = self.exec.update(
            Collection::Tunnels,
            &condition,
            &Update::new().set("device_uid", new_uid),
            true,
        )?;
        Ok(result.matched)
    }
}

#[async_trait]
impl<E: Engine> SystemStore for DocumentStore<E> {
    async fn system_get(&self, ctx: &RequestContext) -> StorageResult<System> {
        self.run(ctx, |h| h.system_get())
            .await
            .in_operation("system", "get")
    }

    async fn system_set(&self, ctx: &RequestContext, system: &System) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.system_set(system))
            .await
            .in_operation("system", "set")
    }
}

#[async_trait]
impl<E: Engine> TunnelStore for DocumentStore<E> {
    async fn tunnel_create(&self, ctx: &RequestContext, tunnel: Tunnel) -> StorageResult<Tunnel> {
        self.run(ctx, move |h| h.tunnel_create(tunnel))
            .await
            .in_operation("tunnel", "create")
    }

    async fn tunnel_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Tunnel>, u64)> {
        self.run(ctx, |h| h.tunnel_list(opts))
            .await
            .in_operation("tunnel", "list")
    }

    async fn tunnel_delete(&self, ctx: &RequestContext, address: &str) -> StorageResult<()> {
        self.run(ctx, |h| h.tunnel_delete(address))
            .await
            .in_operation("tunnel", "delete")
    }

    async fn tunnel_update_device_uid(
        &self,
        ctx: &RequestContext,
        old_uid: &str,
        new_uid: &str,
    ) -> StorageResult<u64> {
        self.run(ctx, |h| h.tunnel_update_device_uid(old_uid, new_uid))
            .await
            .in_operation("tunnel", "update device uid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryEngine;
    use crate::tenant::TenantId;

    #[tokio::test]
    async fn test_system_defaults_then_replaces() {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::new();
        let system = store.system_get(&ctx).await.unwrap();
        assert!(!system.setup);
        assert!(system.authentication.local);

        let mut configured = system.clone();
        configured.setup = true;
        store.system_set(&ctx, &configured).await.unwrap();
        store.system_set(&ctx, &configured).await.unwrap();
        assert_eq!(store.system_get(&ctx).await.unwrap(), configured);
    }

    #[tokio::test]
    async fn test_tunnels_follow_device_uid() {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::for_tenant("t1");
        store
            .tunnel_create(&ctx, Tunnel::new("abc.tunnel", TenantId::new("t1"), "d1", "localhost", 80))
            .await
            .unwrap();

        assert_eq!(store.tunnel_update_device_uid(&ctx, "d1", "d2").await.unwrap(), 1);
        let (tunnels, total) = store.tunnel_list(&ctx, &[]).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(tunnels[0].device_uid, "d2");

        let other = RequestContext::for_tenant("t2");
        assert!(store.tunnel_delete(&other, "abc.tunnel").await.unwrap_err().is_not_found());
        store.tunnel_delete(&ctx, "abc.tunnel").await.unwrap();
    }
}
