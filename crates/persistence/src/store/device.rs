use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{DocumentStore, StoreHandle};
use crate::core::{Collection, DeviceAcceptable, DeviceStore, Engine, Update};
use crate::error::{OperationContext, StorageError, StorageResult};
use crate::models::{Device, DeviceChanges, DeviceStatus};
use crate::query::{
    Condition, Conflicts, DeviceConflicts, DeviceResolver, QueryOption, Stage, detect_conflicts,
    scope_condition,
};
use crate::tenant::RequestContext;

impl StoreHandle<'_> {
    /// Lists devices, computing `acceptable` per device.
    pub fn device_list(
        &mut self,
        acceptable: DeviceAcceptable,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Device>, u64)> {
        let plan = self.plan(Collection::Devices, opts)?;
        let (mut devices, total) = self.list_plan::<Device>(&plan)?;
        for device in &mut devices {
            device.acceptable = acceptable.evaluate(device.status);
        }
        Ok((devices, total))
    }

    /// Resolves exactly one device.
    pub fn device_resolve(
        &mut self,
        resolver: DeviceResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Device> {
        let (device, _) = self.resolve_plan::<Device>(resolver, value, opts)?;
        Ok(device)
    }

    /// Creates a device and counts it in its namespace.
    pub fn device_create(&mut self, mut device: Device) -> StorageResult<Device> {
        if device.uid.is_empty() {
            device.uid = Device::derive_uid(&device.tenant_id, &device.identity.mac);
        }
        device.acceptable = false;
        self.insert(&device)?;

        if !self.bump_device_count(device.tenant_id.as_str(), device.status, 1)? {
            tracing::debug!(tenant = %device.tenant_id, uid = %device.uid, "Device created outside any namespace");
        }
        Ok(device)
    }

    /// Reports which probe fields collide with other devices of the tenant.
    pub fn device_conflicts(&mut self, probe: &DeviceConflicts) -> StorageResult<Conflicts> {
        let scope = scope_condition(self.ctx, Collection::Devices);
        detect_conflicts(&mut *self.exec, scope, probe)
    }

    /// Applies changes to a device.
    pub fn device_update(&mut self, uid: &str, changes: &DeviceChanges) -> StorageResult<()> {
        let mut update = Update::new()
            .set_opt("name", changes.name.clone())
            .set_opt("public_key", changes.public_key.clone())
            .set_opt("remote_addr", changes.remote_addr.clone())
            .set_opt("last_seen", changes.last_seen.map(|at| at.timestamp_millis()));
        if let Some(info) = &changes.info {
            update = update.set("info", serde_json::to_value(info)?);
        }
        update = match changes.disconnected_at {
            Some(Some(at)) => update.set("disconnected_at", at.timestamp_millis()),
            Some(None) => update.unset("disconnected_at"),
            None => update,
        };

        let condition = self.scoped(Collection::Devices, Condition::eq("uid", uid));
        if update.is_empty() {
            self.get::<Device>(condition, uid)?;
            return Ok(());
        }
        self.update_one(Collection::Devices, &condition, &update, uid)?;
        Ok(())
    }

    /// Moves a device to `status`, moving the namespace counters with it.
    pub fn device_update_status(&mut self, uid: &str, status: DeviceStatus) -> StorageResult<()> {
        let condition = self.scoped(Collection::Devices, Condition::eq("uid", uid));
        let device = self.get::<Device>(condition.clone(), uid)?;
        if device.status == status {
            return Ok(());
        }

        let update = Update::new()
            .set("status", status.as_str())
            .set("status_updated_at", Utc::now().timestamp_millis());
        self.update_one(Collection::Devices, &condition, &update, uid)?;

        let tenant = device.tenant_id.as_str();
        self.bump_device_count(tenant, device.status, -1)?;
        self.bump_device_count(tenant, status, 1)?;
        tracing::debug!(uid, from = %device.status, to = %status, "Device status changed");
        Ok(())
    }

    /// Marks devices as seen at `at`. Returns the number of devices updated.
    pub fn device_heartbeat(&mut self, uids: &[String], at: DateTime<Utc>) -> StorageResult<u64> {
        if uids.is_empty() {
            return Ok(0);
        }
        let condition = self.scoped(Collection::Devices, Condition::is_in("uid", uids.iter().map(String::as_str)));
        let update = Update::new()
            .set("last_seen", at.timestamp_millis())
            .unset("disconnected_at");
        let result = self.exec.update(Collection::Devices, &condition, &update, true)?;
        Ok(result.matched)
    }

    /// Deletes a device and its sessions.
    pub fn device_delete(&mut self, uid: &str) -> StorageResult<()> {
        if !self.delete_device_cascade(uid)? {
            return Err(StorageError::not_found("device", uid));
        }
        Ok(())
    }

    /// Deletes devices with their dependents, ignoring unknown uids.
    pub fn device_delete_many(&mut self, uids: &[String]) -> StorageResult<u64> {
        let mut deleted = 0;
        for uid in uids {
            if self.delete_device_cascade(uid)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn delete_device_cascade(&mut self, uid: &str) -> StorageResult<bool> {
        let condition = self.scoped(Collection::Devices, Condition::eq("uid", uid));
        let Some(device) = self.find_one::<Device>(condition.clone())? else {
            return Ok(false);
        };
        self.exec.delete(Collection::Devices, &condition, false)?;

        let sessions: Vec<String> = self
            .exec
            .find(
                Collection::Sessions,
                &[Stage::Match(Condition::eq("device_uid", uid))],
            )?
            .iter()
            .filter_map(|doc| doc.get("uid").and_then(Value::as_str).map(str::to_string))
            .collect();
        if !sessions.is_empty() {
            let session_uids = || sessions.iter().map(String::as_str);
            self.exec.delete(
                Collection::SessionsEvents,
                &Condition::is_in("session", session_uids()),
                true,
            )?;
            self.exec.delete(
                Collection::ActiveSessions,
                &Condition::is_in("uid", session_uids()),
                true,
            )?;
            self.exec
                .delete(Collection::Sessions, &Condition::is_in("uid", session_uids()), true)?;
        }
        self.exec
            .delete(Collection::Tunnels, &Condition::eq("device_uid", uid), true)?;

        self.bump_device_count(device.tenant_id.as_str(), device.status, -1)?;
        tracing::debug!(uid, sessions = sessions.len(), "Deleted device");
        Ok(true)
    }

    /// Rewrites references to `old_uid` in sessions and tunnels.
    pub fn device_migrate_uid(&mut self, old_uid: &str, new_uid: &str) -> StorageResult<()> {
        let sessions = self.session_update_device_uid(old_uid, new_uid)?;
        let tunnels = self.tunnel_update_device_uid(old_uid, new_uid)?;
        tracing::debug!(old_uid, new_uid, sessions, tunnels, "Migrated device uid");
        Ok(())
    }
}

#[async_trait]
impl<E: Engine> DeviceStore for DocumentStore<E> {
    async fn device_list(
        &self,
        ctx: &RequestContext,
        acceptable: DeviceAcceptable,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Device>, u64)> {
        self.run(ctx, |h| h.device_list(acceptable, opts))
            .await
            .in_operation("device", "list")
    }

    async fn device_resolve(
        &self,
        ctx: &RequestContext,
        resolver: DeviceResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Device> {
        self.run(ctx, |h| h.device_resolve(resolver, value, opts))
            .await
            .in_operation("device", "resolve")
    }

    async fn device_create(&self, ctx: &RequestContext, device: Device) -> StorageResult<Device> {
        self.run_in_transaction(ctx, move |h| h.device_create(device))
            .await
            .in_operation("device", "create")
    }

    async fn device_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &DeviceConflicts,
    ) -> StorageResult<Conflicts> {
        self.run(ctx, |h| h.device_conflicts(probe))
            .await
            .in_operation("device", "check conflicts")
    }

    async fn device_update(
        &self,
        ctx: &RequestContext,
        uid: &str,
        changes: &DeviceChanges,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.device_update(uid, changes))
            .await
            .in_operation("device", "update")
    }

    async fn device_update_status(
        &self,
        ctx: &RequestContext,
        uid: &str,
        status: DeviceStatus,
    ) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.device_update_status(uid, status))
            .await
            .in_operation("device", "update status")
    }

    async fn device_heartbeat(
        &self,
        ctx: &RequestContext,
        uids: &[String],
        at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.run(ctx, |h| h.device_heartbeat(uids, at))
            .await
            .in_operation("device", "heartbeat")
    }

    async fn device_delete(&self, ctx: &RequestContext, uid: &str) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.device_delete(uid))
            .await
            .in_operation("device", "delete")
    }

    async fn device_delete_many(
        &self,
        ctx: &RequestContext,
        uids: &[String],
    ) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.device_delete_many(uids))
            .await
            .in_operation("device", "delete many")
    }

    async fn device_migrate_uid(
        &self,
        ctx: &RequestContext,
        old_uid: &str,
        new_uid: &str,
    ) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.device_migrate_uid(old_uid, new_uid))
            .await
            .in_operation("device", "migrate uid")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backends::memory::MemoryEngine;
    use crate::core::{NamespaceStore, SessionStore};
    use crate::counter::{CounterCache, MemoryCounterCache};
    use crate::models::{Namespace, Session};
    use crate::query::NamespaceResolver;
    use crate::tenant::TenantId;

    async fn setup() -> (DocumentStore<MemoryEngine>, Arc<MemoryCounterCache>, TenantId) {
        let cache = Arc::new(MemoryCounterCache::new());
        let store = DocumentStore::builder(MemoryEngine::new())
            .with_counter_cache(cache.clone())
            .build();
        let ns = store
            .namespace_create(&RequestContext::new(), Namespace::new("ns", "u1"))
            .await
            .unwrap();
        (store, cache, ns.tenant_id)
    }

    #[tokio::test]
    async fn test_create_derives_uid_and_counts() {
        let (store, cache, tenant) = setup().await;
        let ctx = RequestContext::for_tenant(tenant.clone());

        let device = store
            .device_create(&ctx, Device::new(tenant.clone(), "web", "aa:bb"))
            .await
            .unwrap();
        assert_eq!(device.uid, Device::derive_uid(&tenant, "aa:bb"));

        let ns = store
            .namespace_resolve(&ctx, NamespaceResolver::TenantId, tenant.as_str(), &[])
            .await
            .unwrap();
        assert_eq!(ns.devices_pending_count, 1);
        assert_eq!(
            cache
                .counter(tenant.as_str(), "devices_pending_count")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_status_change_moves_counters() {
        let (store, cache, tenant) = setup().await;
        let ctx = RequestContext::for_tenant(tenant.clone());
        let device = store
            .device_create(&ctx, Device::new(tenant.clone(), "web", "aa:bb"))
            .await
            .unwrap();

        store
            .device_update_status(&ctx, &device.uid, DeviceStatus::Accepted)
            .await
            .unwrap();
        let ns = store
            .namespace_resolve(&ctx, NamespaceResolver::TenantId, tenant.as_str(), &[])
            .await
            .unwrap();
        assert_eq!(ns.devices_pending_count, 0);
        assert_eq!(ns.devices_accepted_count, 1);
        assert_eq!(
            cache
                .counter(tenant.as_str(), "devices_accepted_count")
                .await
                .unwrap(),
            1
        );

        let (devices, _) = store
            .device_list(&ctx, DeviceAcceptable::IfNotAccepted, &[])
            .await
            .unwrap();
        assert!(!devices[0].acceptable);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let (store, _, tenant) = setup().await;
        let ctx = RequestContext::for_tenant(tenant.clone());
        let device = store
            .device_create(&ctx, Device::new(tenant.clone(), "web", "aa:bb"))
            .await
            .unwrap();

        let other = RequestContext::for_tenant("other");
        let err = store
            .device_resolve(&other, DeviceResolver::Uid, &device.uid, &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.device_delete(&other, &device.uid).await.unwrap_err().is_not_found());
        assert_eq!(
            store
                .device_heartbeat(&other, &[device.uid.clone()], Utc::now())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_delete_cascades_to_sessions() {
        let (store, _, tenant) = setup().await;
        let ctx = RequestContext::for_tenant(tenant.clone());
        let device = store
            .device_create(&ctx, Device::new(tenant.clone(), "web", "aa:bb"))
            .await
            .unwrap();
        store
            .session_create(&ctx, Session::new("s1", tenant.clone(), device.uid.clone(), "root"))
            .await
            .unwrap();

        let deleted = store
            .device_delete_many(&ctx, &[device.uid.clone(), "unknown".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.active_session_resolve(&ctx, "s1").await.unwrap_err().is_not_found());
        let (sessions, total) = store.session_list(&ctx, &[]).await.unwrap();
        assert!(sessions.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_update_clears_disconnection() {
        let (store, _, tenant) = setup().await;
        let ctx = RequestContext::for_tenant(tenant.clone());
        let device = store
            .device_create(&ctx, Device::new(tenant.clone(), "web", "aa:bb"))
            .await
            .unwrap();

        let at = Utc::now();
        store
            .device_update(
                &ctx,
                &device.uid,
                &DeviceChanges {
                    disconnected_at: Some(Some(at)),
                    name: Some("web-2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let updated = store
            .device_resolve(&ctx, DeviceResolver::Hostname, "web-2", &[])
            .await
            .unwrap();
        assert_eq!(
            updated.disconnected_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );

        assert_eq!(store.device_heartbeat(&ctx, &[device.uid.clone()], at).await.unwrap(), 1);
        let seen = store
            .device_resolve(&ctx, DeviceResolver::Uid, &device.uid, &[])
            .await
            .unwrap();
        assert!(seen.disconnected_at.is_none());
    }
}
