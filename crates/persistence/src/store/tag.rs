use async_trait::async_trait;
use chrono::Utc;

use super::{DocumentStore, StoreHandle, generate_id};
use crate::core::{Collection, Engine, TagStore, Update};
use crate::error::{OperationContext, StorageError, StorageResult};
use crate::models::{Tag, TagTarget};
use crate::query::{
    Condition, Conflicts, QueryOption, TagConflicts, TagResolver, detect_conflicts, scope_condition,
};
use crate::tenant::RequestContext;

impl StoreHandle<'_> {
    /// Creates a tag.
    pub fn tag_create(&mut self, mut tag: Tag) -> StorageResult<Tag> {
        generate_id(&mut tag.id);
        self.insert(&tag)?;
        Ok(tag)
    }

    /// Reports which probe fields collide with other tags of the tenant.
    pub fn tag_conflicts(&mut self, probe: &TagConflicts) -> StorageResult<Conflicts> {
        let scope = scope_condition(self.ctx, Collection::Tags);
        detect_conflicts(&mut *self.exec, scope, probe)
    }

    /// Lists tags.
    pub fn tag_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<Tag>, u64)> {
        let plan = self.plan(Collection::Tags, opts)?;
        self.list_plan::<Tag>(&plan)
    }

    /// Resolves exactly one tag.
    pub fn tag_resolve(
        &mut self,
        resolver: TagResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Tag> {
        let (tag, _) = self.resolve_plan::<Tag>(resolver, value, opts)?;
        Ok(tag)
    }

    fn tag_by_id(&mut self, id: &str) -> StorageResult<Tag> {
        let condition = self.scoped(Collection::Tags, Condition::eq("id", id));
        self.get::<Tag>(condition, id)
    }

    fn tag_by_name(&mut self, tenant_id: &str, name: &str) -> StorageResult<Tag> {
        let condition = self.in_tenant(Collection::Tags, tenant_id, Condition::eq("name", name));
        self.get::<Tag>(condition, name)
    }

    /// Renames a tag and every reference to it.
    pub fn tag_update(&mut self, id: &str, name: &str) -> StorageResult<()> {
        let tag = self.tag_by_id(id)?;
        self.rename_tag(&tag, name)?;
        Ok(())
    }

    /// Renames a tag within a tenant. Returns the number of referencing
    /// documents updated.
    pub fn tags_rename(&mut self, tenant_id: &str, old_name: &str, new_name: &str) -> StorageResult<u64> {
        let tag = self.tag_by_name(tenant_id, old_name)?;
        self.rename_tag(&tag, new_name)
    }

    fn rename_tag(&mut self, tag: &Tag, new_name: &str) -> StorageResult<u64> {
        if tag.name == new_name {
            return Ok(0);
        }
        let tenant = tag.tenant_id.as_str();
        let taken = Condition::all([
            Condition::eq("tenant_id", tenant),
            Condition::eq("name", new_name),
        ]);
        if self.exec.count(Collection::Tags, &taken)? > 0 {
            return Err(StorageError::duplicate("tag", vec!["name".to_string()]));
        }

        self.update_one(
            Collection::Tags,
            &Condition::eq("id", tag.id.as_str()),
            &Update::new()
                .set("name", new_name)
                .set("updated_at", Utc::now().timestamp_millis()),
            &tag.id,
        )?;

        let mut updated = 0;
        for target in TagTarget::ALL {
            let path = target.tags_path();
            let result = self.exec.update(
                target.collection(),
                &Condition::all([
                    Condition::eq("tenant_id", tenant),
                    Condition::eq(path, tag.name.as_str()),
                ]),
                &Update::new()
                    .add_to_set(path, new_name)
                    .pull(path, tag.name.as_str()),
                true,
            )?;
            updated += result.modified;
        }
        tracing::debug!(tenant, from = %tag.name, to = new_name, updated, "Renamed tag");
        Ok(updated)
    }

    /// Adds a tag to one target document.
    pub fn tag_push_to_target(&mut self, tag_id: &str, target: TagTarget, target_id: &str) -> StorageResult<()> {
        let tag = self.tag_by_id(tag_id)?;
        let collection = target.collection();
        let key = collection.key_field().unwrap_or("id");
        let condition = Condition::all([
            Condition::eq("tenant_id", tag.tenant_id.as_str()),
            Condition::eq(key, target_id),
        ]);
        self.update_one(
            collection,
            &condition,
            &Update::new().add_to_set(target.tags_path(), tag.name.as_str()),
            target_id,
        )?;
        Ok(())
    }

    /// Removes a tag from the given targets, or from every target of the
    /// kind in the tag's tenant when `target_ids` is empty.
    pub fn tag_pull_from_target(
        &mut self,
        tag_id: &str,
        target: TagTarget,
        target_ids: &[String],
    ) -> StorageResult<u64> {
        let tag = self.tag_by_id(tag_id)?;
        let collection = target.collection();
        let path = target.tags_path();

        let mut parts = vec![
            Condition::eq("tenant_id", tag.tenant_id.as_str()),
            Condition::eq(path, tag.name.as_str()),
        ];
        if !target_ids.is_empty() {
            let key = collection.key_field().unwrap_or("id");
            parts.push(Condition::is_in(key, target_ids.iter().map(String::as_str)));
        }

        let result = self.exec.update(
            collection,
            &Condition::all(parts),
            &Update::new().pull(path, tag.name.as_str()),
            true,
        )?;
        Ok(result.modified)
    }

    /// Deletes a tag within a tenant. Returns the number of referencing
    /// documents updated.
    pub fn tags_delete(&mut self, tenant_id: &str, name: &str) -> StorageResult<u64> {
        let tag = self.tag_by_name(tenant_id, name)?;
        self.delete_tag(&tag)
    }

    /// Deletes a tag by id together with its references.
    pub fn tag_delete(&mut self, id: &str) -> StorageResult<()> {
        let tag = self.tag_by_id(id)?;
        self.delete_tag(&tag)?;
        Ok(())
    }

    fn delete_tag(&mut self, tag: &Tag) -> StorageResult<u64> {
        self.delete_one(Collection::Tags, &Condition::eq("id", tag.id.as_str()), &tag.id)?;

        let mut updated = 0;
        for target in TagTarget::ALL {
            let path = target.tags_path();
            let result = self.exec.update(
                target.collection(),
                &Condition::all([
                    Condition::eq("tenant_id", tag.tenant_id.as_str()),
                    Condition::eq(path, tag.name.as_str()),
                ]),
                &Update::new().pull(path, tag.name.as_str()),
                true,
            )?;
            updated += result.modified;
        }
        Ok(updated)
    }
}

#[async_trait]
impl<E: Engine> TagStore for DocumentStore<E> {
    async fn tag_create(&self, ctx: &RequestContext, tag: Tag) -> StorageResult<Tag> {
        self.run(ctx, move |h| h.tag_create(tag))
            .await
            .in_operation("tag", "create")
    }

    async fn tag_conflicts(&self, ctx: &RequestContext, probe: &TagConflicts) -> StorageResult<Conflicts> {
        self.run(ctx, |h| h.tag_conflicts(probe))
            .await
            .in_operation("tag", "check conflicts")
    }

    async fn tag_list(&self, ctx: &RequestContext, opts: &[QueryOption]) -> StorageResult<(Vec<Tag>, u64)> {
        self.run(ctx, |h| h.tag_list(opts))
            .await
            .in_operation("tag", "list")
    }

    async fn tag_resolve(
        &self,
        ctx: &RequestContext,
        resolver: TagResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Tag> {
        self.run(ctx, |h| h.tag_resolve(resolver, value, opts))
            .await
            .in_operation("tag", "resolve")
    }

    async fn tag_update(&self, ctx: &RequestContext, id: &str, name: &str) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.tag_update(id, name))
            .await
            .in_operation("tag", "update")
    }

    async fn tag_push_to_target(
        &self,
        ctx: &RequestContext,
        tag_id: &str,
        target: TagTarget,
        target_id: &str,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.tag_push_to_target(tag_id, target, target_id))
            .await
            .in_operation("tag", "push to target")
    }

    async fn tag_pull_from_target(
        &self,
        ctx: &RequestContext,
        tag_id: &str,
        target: TagTarget,
        target_ids: &[String],
    ) -> StorageResult<u64> {
        self.run(ctx, |h| h.tag_pull_from_target(tag_id, target, target_ids))
            .await
            .in_operation("tag", "pull from target")
    }

    async fn tags_rename(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.tags_rename(tenant_id, old_name, new_name))
            .await
            .in_operation("tag", "rename")
    }

    async fn tags_delete(&self, ctx: &RequestContext, tenant_id: &str, name: &str) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.tags_delete(tenant_id, name))
            .await
            .in_operation("tag", "delete")
    }

    async fn tag_delete(&self, ctx: &RequestContext, id: &str) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.tag_delete(id))
            .await
            .in_operation("tag", "delete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryEngine;
    use crate::core::{DeviceStore, PublicKeyStore};
    use crate::models::{Device, PublicKey};
    use crate::query::{DeviceResolver, PublicKeyResolver};
    use crate::tenant::TenantId;

    async fn setup() -> (DocumentStore<MemoryEngine>, RequestContext, Tag, Device) {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::for_tenant("t1");
        let tag = store.tag_create(&ctx, Tag::new(TenantId::new("t1"), "prod")).await.unwrap();
        let device = store
            .device_create(&ctx, Device::new(TenantId::new("t1"), "web", "aa"))
            .await
            .unwrap();
        store
            .tag_push_to_target(&ctx, &tag.id, TagTarget::Device, &device.uid)
            .await
            .unwrap();
        let mut key = PublicKey::new(TenantId::new("t1"), "fp", "data", "ops");
        key.filter.tags = vec!["prod".to_string()];
        store.public_key_create(&ctx, key).await.unwrap();
        (store, ctx, tag, device)
    }

    #[tokio::test]
    async fn test_rename_rewrites_references() {
        let (store, ctx, _, device) = setup().await;
        let updated = store.tags_rename(&ctx, "t1", "prod", "production").await.unwrap();
        assert_eq!(updated, 2);

        let device = store
            .device_resolve(&ctx, DeviceResolver::Uid, &device.uid, &[])
            .await
            .unwrap();
        assert_eq!(device.tags, vec!["production"]);
        let key = store
            .public_key_resolve(&ctx, PublicKeyResolver::Fingerprint, "fp", &[])
            .await
            .unwrap();
        assert_eq!(key.filter.tags, vec!["production"]);
        assert!(
            store
                .tag_resolve(&ctx, TagResolver::Name, "prod", &[])
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_create_for_another_tenant_is_rejected() {
        let (store, ctx, _, _) = setup().await;
        let err = store
            .tag_create(&ctx, Tag::new(TenantId::new("t2"), "planted"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let other = RequestContext::for_tenant("t2");
        let (_, total) = store.tag_list(&other, &[]).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_rename_to_existing_name_is_duplicate() {
        let (store, ctx, tag, _) = setup().await;
        store.tag_create(&ctx, Tag::new(TenantId::new("t1"), "dev")).await.unwrap();
        let err = store.tag_update(&ctx, &tag.id, "dev").await.unwrap_err();
        assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));
    }

    #[tokio::test]
    async fn test_delete_and_pull() {
        let (store, ctx, tag, device) = setup().await;
        let pulled = store
            .tag_pull_from_target(&ctx, &tag.id, TagTarget::PublicKey, &[])
            .await
            .unwrap();
        assert_eq!(pulled, 1);

        let updated = store.tags_delete(&ctx, "t1", "prod").await.unwrap();
        assert_eq!(updated, 1);
        let device = store
            .device_resolve(&ctx, DeviceResolver::Uid, &device.uid, &[])
            .await
            .unwrap();
        assert!(device.tags.is_empty());
        assert!(store.tag_delete(&ctx, &tag.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_push_to_missing_target() {
        let (store, ctx, tag, _) = setup().await;
        let err = store
            .tag_push_to_target(&ctx, &tag.id, TagTarget::Device, "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
