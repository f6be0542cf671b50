//! Namespaces, memberships and membership invitations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{DocumentStore, StoreHandle, generate_id};
use crate::core::{Collection, Engine, MemberStore, MembershipInvitationStore, NamespaceStore, Update};
use crate::error::{OperationContext, StorageError, StorageResult};
use crate::models::{
    DeviceStatus, Member, MemberChanges, MembershipInvitation, MembershipInvitationChanges,
    Namespace, NamespaceChanges, Role, User, normalize,
};
use crate::query::{
    Condition, Conflicts, Enrichment, NamespaceConflicts, NamespaceResolver, Order, QueryOption,
    Stage, detect_conflicts,
};
use crate::tenant::{RequestContext, TenantId};

/// Namespaces recounted per engine call by `namespace_sync_device_counts`.
const SYNC_BATCH_SIZE: u64 = 100;

/// Collections whose documents belong to exactly one namespace.
const OWNED_COLLECTIONS: [Collection; 9] = [
    Collection::Devices,
    Collection::Sessions,
    Collection::SessionsEvents,
    Collection::ActiveSessions,
    Collection::Tags,
    Collection::ApiKeys,
    Collection::PublicKeys,
    Collection::Tunnels,
    Collection::MembershipInvitations,
];

fn by_tenant(tenant_id: &str) -> Condition {
    Condition::eq("tenant_id", tenant_id)
}

fn has_member(user_id: &str) -> Condition {
    Condition::elem_match("members", Condition::eq("id", user_id))
}

impl StoreHandle<'_> {
    /// Lists namespaces.
    pub fn namespace_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<Namespace>, u64)> {
        let plan = self.plan(Collection::Namespaces, opts)?;
        let (mut namespaces, total) = self.list_plan::<Namespace>(&plan)?;
        self.enrich_namespaces(&mut namespaces, plan.enrichments())?;
        Ok((namespaces, total))
    }

    /// Resolves exactly one namespace.
    pub fn namespace_resolve(
        &mut self,
        resolver: NamespaceResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Namespace> {
        let (namespace, plan) = self.resolve_plan::<Namespace>(resolver, value, opts)?;
        let mut namespaces = [namespace];
        self.enrich_namespaces(&mut namespaces, plan.enrichments())?;
        let [namespace] = namespaces;
        Ok(namespace)
    }

    /// The user's preferred namespace, or the first one they belong to.
    pub fn namespace_get_preferred(&mut self, user_id: &str) -> StorageResult<Namespace> {
        let user = self.get::<User>(Condition::eq("id", user_id), user_id)?;
        let preferred = &user.preferences.preferred_namespace;

        let mut found = None;
        if !preferred.is_empty() {
            found = self.find_one::<Namespace>(Condition::all([
                by_tenant(preferred),
                has_member(user_id),
            ]))?;
        }
        if found.is_none() {
            found = self
                .find_all::<Namespace>(&[
                    Stage::Match(has_member(user_id)),
                    Stage::Sort {
                        field: "created_at".to_string(),
                        order: Order::Asc,
                    },
                    Stage::Limit(1),
                ])?
                .pop();
        }

        let namespace = found.ok_or_else(|| StorageError::not_found("namespace", user_id))?;
        let mut namespaces = [namespace];
        self.enrich_namespaces(&mut namespaces, &[Enrichment::MembersData])?;
        let [namespace] = namespaces;
        Ok(namespace)
    }

    /// Creates a namespace.
    pub fn namespace_create(&mut self, mut namespace: Namespace) -> StorageResult<Namespace> {
        namespace.name = normalize(&namespace.name);
        if namespace.tenant_id.is_empty() {
            namespace.tenant_id = TenantId::generate();
        }
        if !namespace.owner.is_empty() && namespace.member(&namespace.owner).is_none() {
            let owner = Member::new(namespace.owner.clone(), Role::Owner);
            namespace.members.push(owner);
        }

        self.insert(&namespace)?;
        tracing::debug!(tenant = %namespace.tenant_id, name = %namespace.name, "Created namespace");
        Ok(namespace)
    }

    /// Reports which probe fields collide with other namespaces.
    pub fn namespace_conflicts(&mut self, probe: &NamespaceConflicts) -> StorageResult<Conflicts> {
        detect_conflicts(&mut *self.exec, None, probe)
    }

    /// Applies changes to a namespace.
    pub fn namespace_update(&mut self, tenant_id: &str, changes: &NamespaceChanges) -> StorageResult<()> {
        let update = Update::new()
            .set_opt("name", changes.name.as_deref().map(normalize))
            .set_opt("max_devices", changes.max_devices)
            .set_opt("settings.session_record", changes.session_record)
            .set_opt(
                "settings.connection_announcement",
                changes.connection_announcement.clone(),
            );

        if update.is_empty() {
            self.get::<Namespace>(by_tenant(tenant_id), tenant_id)?;
            return Ok(());
        }
        self.update_one(Collection::Namespaces, &by_tenant(tenant_id), &update, tenant_id)?;
        Ok(())
    }

    /// Adds `delta` to the namespace counter for `status`, never going below zero.
    pub fn namespace_increment_device_count(
        &mut self,
        tenant_id: &str,
        status: DeviceStatus,
        delta: i64,
    ) -> StorageResult<()> {
        if !self.bump_device_count(tenant_id, status, delta)? {
            return Err(StorageError::not_found("namespace", tenant_id));
        }
        Ok(())
    }

    /// Moves a namespace counter and records the delta for the counter cache.
    /// Returns `false` when the namespace does not exist.
    pub(crate) fn bump_device_count(
        &mut self,
        tenant_id: &str,
        status: DeviceStatus,
        delta: i64,
    ) -> StorageResult<bool> {
        let field = status.counter_field();
        let namespace = by_tenant(tenant_id);

        let matched = if delta >= 0 {
            let result = self.exec.update(
                Collection::Namespaces,
                &namespace,
                &Update::new().inc(field, delta),
                false,
            )?;
            result.matched > 0
        } else {
            // Only decrement when the counter can absorb it; otherwise floor at zero.
            let enough = Condition::all([namespace.clone(), Condition::gt(field, -delta - 1)]);
            let result = self.exec.update(
                Collection::Namespaces,
                &enough,
                &Update::new().inc(field, delta),
                false,
            )?;
            if result.matched > 0 {
                true
            } else {
                let floored = self.exec.update(
                    Collection::Namespaces,
                    &namespace,
                    &Update::new().set(field, 0),
                    false,
                )?;
                floored.matched > 0
            }
        };

        if matched && delta != 0 {
            self.record_counter(tenant_id, status, delta);
        }
        Ok(matched)
    }

    /// Recounts the device counters of one batch of namespaces, in tenant id
    /// order. Returns the number of namespaces in the batch.
    pub(crate) fn namespace_sync_device_count_batch(&mut self, skip: u64, limit: u64) -> StorageResult<u64> {
        let batch = self.exec.find(
            Collection::Namespaces,
            &[
                Stage::Sort {
                    field: "tenant_id".to_string(),
                    order: Order::Asc,
                },
                Stage::Skip(skip),
                Stage::Limit(limit),
            ],
        )?;

        for doc in &batch {
            let Some(tenant_id) = doc.get("tenant_id").and_then(Value::as_str) else {
                continue;
            };
            let mut update = Update::new();
            for status in DeviceStatus::ALL {
                let count = self.exec.count(
                    Collection::Devices,
                    &Condition::all([by_tenant(tenant_id), Condition::eq("status", status.as_str())]),
                )?;
                update = update.set(status.counter_field(), count);
            }
            self.exec
                .update(Collection::Namespaces, &by_tenant(tenant_id), &update, false)?;
        }

        Ok(batch.len() as u64)
    }

    /// Deletes a namespace and everything it owns.
    pub fn namespace_delete(&mut self, tenant_id: &str) -> StorageResult<()> {
        if !self.delete_namespace_cascade(tenant_id)? {
            return Err(StorageError::not_found("namespace", tenant_id));
        }
        Ok(())
    }

    /// Deletes several namespaces, ignoring unknown ids.
    pub fn namespace_delete_many(&mut self, tenant_ids: &[String]) -> StorageResult<u64> {
        let mut deleted = 0;
        for tenant_id in tenant_ids {
            if self.delete_namespace_cascade(tenant_id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn delete_namespace_cascade(&mut self, tenant_id: &str) -> StorageResult<bool> {
        let Some(namespace) = self.find_one::<Namespace>(by_tenant(tenant_id))? else {
            return Ok(false);
        };
        self.exec
            .delete(Collection::Namespaces, &by_tenant(tenant_id), false)?;

        for collection in OWNED_COLLECTIONS {
            let removed = self.exec.delete(collection, &by_tenant(tenant_id), true)?;
            if removed > 0 {
                tracing::debug!(tenant = tenant_id, %collection, removed, "Cascaded namespace delete");
            }
        }
        self.exec.update(
            Collection::Users,
            &Condition::eq("preferences.preferred_namespace", tenant_id),
            &Update::new().set("preferences.preferred_namespace", ""),
            true,
        )?;

        for status in DeviceStatus::ALL {
            let count = namespace.device_count(status);
            if count > 0 {
                self.record_counter(tenant_id, status, -count);
            }
        }
        Ok(true)
    }

    fn enrich_namespaces(
        &mut self,
        namespaces: &mut [Namespace],
        enrichments: &[Enrichment],
    ) -> StorageResult<()> {
        for enrichment in enrichments {
            match enrichment {
                Enrichment::MembersData => {
                    for namespace in namespaces.iter_mut() {
                        let ids: Vec<&str> = namespace.members.iter().map(|m| m.id.as_str()).collect();
                        let users: HashMap<String, User> = self
                            .find_all::<User>(&[Stage::Match(Condition::is_in("id", ids))])?
                            .into_iter()
                            .map(|u| (u.id.clone(), u))
                            .collect();
                        for member in &mut namespace.members {
                            if let Some(user) = users.get(&member.id) {
                                member.email = user.email.clone();
                                member.username = user.username.clone();
                            }
                        }
                    }
                }
                Enrichment::AcceptedDeviceCount => {
                    for namespace in namespaces.iter_mut() {
                        let accepted = self.exec.count(
                            Collection::Devices,
                            &Condition::all([
                                by_tenant(namespace.tenant_id.as_str()),
                                Condition::eq("status", DeviceStatus::Accepted.as_str()),
                            ]),
                        )?;
                        namespace.devices_accepted_count = accepted as i64;
                    }
                }
                Enrichment::SessionActivity | Enrichment::SessionDevice => {}
            }
        }
        Ok(())
    }

    /// Adds a member.
    pub fn namespace_create_membership(&mut self, tenant_id: &str, mut member: Member) -> StorageResult<()> {
        member.email.clear();
        member.username.clear();
        let doc = serde_json::to_value(&member)?;

        let absent = Condition::all([
            by_tenant(tenant_id),
            Condition::Not(Box::new(has_member(&member.id))),
        ]);
        let result = self.exec.update(
            Collection::Namespaces,
            &absent,
            &Update::new().push("members", doc),
            false,
        )?;
        if result.matched > 0 {
            return Ok(());
        }

        if self.exec.count(Collection::Namespaces, &by_tenant(tenant_id))? > 0 {
            Err(StorageError::duplicate("namespace", vec!["members".to_string()]))
        } else {
            Err(StorageError::not_found("namespace", tenant_id))
        }
    }

    /// Changes a member's role or status.
    pub fn namespace_update_membership(
        &mut self,
        tenant_id: &str,
        user_id: &str,
        changes: &MemberChanges,
    ) -> StorageResult<()> {
        let condition = Condition::all([by_tenant(tenant_id), has_member(user_id)]);
        let this_member = Condition::eq("id", user_id);

        let mut update = Update::new();
        if let Some(role) = changes.role {
            update = update.set_matching("members", this_member.clone(), "role", serde_json::to_value(role)?);
        }
        if let Some(status) = changes.status {
            update = update.set_matching("members", this_member, "status", serde_json::to_value(status)?);
        }

        if update.is_empty() {
            if self.exec.count(Collection::Namespaces, &condition)? == 0 {
                return Err(StorageError::not_found("member", user_id));
            }
            return Ok(());
        }
        let result = self
            .exec
            .update(Collection::Namespaces, &condition, &update, false)?;
        if result.matched == 0 {
            return Err(StorageError::not_found("member", user_id));
        }
        Ok(())
    }

    /// Removes a member and clears it as the user's preferred namespace.
    pub fn namespace_delete_membership(&mut self, tenant_id: &str, user_id: &str) -> StorageResult<()> {
        let condition = Condition::all([by_tenant(tenant_id), has_member(user_id)]);
        let result = self.exec.update(
            Collection::Namespaces,
            &condition,
            &Update::new().pull_matching("members", Condition::eq("id", user_id)),
            false,
        )?;
        if result.matched == 0 {
            return Err(StorageError::not_found("member", user_id));
        }

        self.exec.update(
            Collection::Users,
            &Condition::all([
                Condition::eq("id", user_id),
                Condition::eq("preferences.preferred_namespace", tenant_id),
            ]),
            &Update::new().set("preferences.preferred_namespace", ""),
            false,
        )?;
        Ok(())
    }

    /// Records an invitation.
    pub fn membership_invitation_create(
        &mut self,
        mut invitation: MembershipInvitation,
    ) -> StorageResult<MembershipInvitation> {
        generate_id(&mut invitation.id);
        self.insert(&invitation)?;
        Ok(invitation)
    }

    /// The most recent invitation of `user_id` to `tenant_id`.
    pub fn membership_invitation_resolve(
        &mut self,
        tenant_id: &str,
        user_id: &str,
    ) -> StorageResult<MembershipInvitation> {
        let condition = self.in_tenant(
            Collection::MembershipInvitations,
            tenant_id,
            Condition::eq("user_id", user_id),
        );
        self.find_all::<MembershipInvitation>(&[
            Stage::Match(condition),
            Stage::Sort {
                field: "created_at".to_string(),
                order: Order::Desc,
            },
            Stage::Limit(1),
        ])?
        .pop()
        .ok_or_else(|| StorageError::not_found("membership invitation", user_id))
    }

    /// Updates the most recent invitation of `user_id` to `tenant_id`.
    pub fn membership_invitation_update(
        &mut self,
        tenant_id: &str,
        user_id: &str,
        changes: &MembershipInvitationChanges,
    ) -> StorageResult<()> {
        let invitation = self.membership_invitation_resolve(tenant_id, user_id)?;
        let now = Utc::now().timestamp_millis();

        let mut update = Update::new().set("updated_at", now);
        if let Some(role) = changes.role {
            update = update.set("role", serde_json::to_value(role)?);
        }
        if let Some(status) = changes.status {
            update = update
                .set("status", serde_json::to_value(status)?)
                .set("status_updated_at", now);
        }
        if let Some(expires_at) = changes.expires_at {
            update = update.set("expires_at", expires_at.timestamp_millis());
        }
        if changes.resend {
            update = update.inc("invitations", 1);
        }

        self.update_one(
            Collection::MembershipInvitations,
            &Condition::eq("id", invitation.id.as_str()),
            &update,
            &invitation.id,
        )?;
        Ok(())
    }
}

#[async_trait]
impl<E: Engine> NamespaceStore for DocumentStore<E> {
    async fn namespace_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Namespace>, u64)> {
        self.run(ctx, |h| h.namespace_list(opts))
            .await
            .in_operation("namespace", "list")
    }

    async fn namespace_resolve(
        &self,
        ctx: &RequestContext,
        resolver: NamespaceResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Namespace> {
        self.run(ctx, |h| h.namespace_resolve(resolver, value, opts))
            .await
            .in_operation("namespace", "resolve")
    }

    async fn namespace_get_preferred(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> StorageResult<Namespace> {
        self.run(ctx, |h| h.namespace_get_preferred(user_id))
            .await
            .in_operation("namespace", "get preferred")
    }

    async fn namespace_create(
        &self,
        ctx: &RequestContext,
        namespace: Namespace,
    ) -> StorageResult<Namespace> {
        self.run(ctx, move |h| h.namespace_create(namespace))
            .await
            .in_operation("namespace", "create")
    }

    async fn namespace_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &NamespaceConflicts,
    ) -> StorageResult<Conflicts> {
        self.run(ctx, |h| h.namespace_conflicts(probe))
            .await
            .in_operation("namespace", "check conflicts")
    }

    async fn namespace_update(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        changes: &NamespaceChanges,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.namespace_update(tenant_id, changes))
            .await
            .in_operation("namespace", "update")
    }

    async fn namespace_increment_device_count(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        status: DeviceStatus,
        delta: i64,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.namespace_increment_device_count(tenant_id, status, delta))
            .await
            .in_operation("namespace", "increment device count")
    }

    async fn namespace_sync_device_counts(&self, ctx: &RequestContext) -> StorageResult<u64> {
        let mut processed = 0;
        loop {
            ctx.check()?;
            let batch = self
                .run(ctx, |h| h.namespace_sync_device_count_batch(processed, SYNC_BATCH_SIZE))
                .await
                .in_operation("namespace", "sync device counts")?;
            processed += batch;
            if batch < SYNC_BATCH_SIZE {
                break;
            }
            tokio::task::yield_now().await;
        }
        tracing::info!(namespaces = processed, "Synchronised namespace device counts");
        Ok(processed)
    }

    async fn namespace_delete(&self, ctx: &RequestContext, tenant_id: &str) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.namespace_delete(tenant_id))
            .await
            .in_operation("namespace", "delete")
    }

    async fn namespace_delete_many(
        &self,
        ctx: &RequestContext,
        tenant_ids: &[String],
    ) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.namespace_delete_many(tenant_ids))
            .await
            .in_operation("namespace", "delete many")
    }
}

#[async_trait]
impl<E: Engine> MemberStore for DocumentStore<E> {
    async fn namespace_create_membership(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        member: Member,
    ) -> StorageResult<()> {
        self.run(ctx, move |h| h.namespace_create_membership(tenant_id, member))
            .await
            .in_operation("member", "create")
    }

    async fn namespace_update_membership(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
        changes: &MemberChanges,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.namespace_update_membership(tenant_id, user_id, changes))
            .await
            .in_operation("member", "update")
    }

    async fn namespace_delete_membership(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
    ) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.namespace_delete_membership(tenant_id, user_id))
            .await
            .in_operation("member", "delete")
    }
}

#[async_trait]
impl<E: Engine> MembershipInvitationStore for DocumentStore<E> {
    async fn membership_invitation_create(
        &self,
        ctx: &RequestContext,
        invitation: MembershipInvitation,
    ) -> StorageResult<MembershipInvitation> {
        self.run(ctx, move |h| h.membership_invitation_create(invitation))
            .await
            .in_operation("membership invitation", "create")
    }

    async fn membership_invitation_resolve(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
    ) -> StorageResult<MembershipInvitation> {
        self.run(ctx, |h| h.membership_invitation_resolve(tenant_id, user_id))
            .await
            .in_operation("membership invitation", "resolve")
    }

    async fn membership_invitation_update(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
        changes: &MembershipInvitationChanges,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.membership_invitation_update(tenant_id, user_id, changes))
            .await
            .in_operation("membership invitation", "update")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryEngine;
    use crate::core::{DeviceStore, UserStore};
    use crate::models::{Device, MemberStatus};

    fn store() -> DocumentStore<MemoryEngine> {
        DocumentStore::new(MemoryEngine::new())
    }

    async fn seed(store: &DocumentStore<MemoryEngine>, name: &str, owner: &str) -> Namespace {
        store
            .namespace_create(&RequestContext::new(), Namespace::new(name, owner))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_normalizes_and_adds_owner() {
        let store = store();
        let ns = seed(&store, "  Dev-Team ", "u1").await;
        assert_eq!(ns.name, "dev-team");
        assert!(!ns.tenant_id.is_empty());
        assert_eq!(ns.members.len(), 1);
        assert_eq!(ns.members[0].role, Role::Owner);

        let ctx = RequestContext::new();
        let found = store
            .namespace_resolve(&ctx, NamespaceResolver::Name, "DEV-TEAM", &[])
            .await
            .unwrap();
        assert_eq!(found.tenant_id, ns.tenant_id);

        let err = store
            .namespace_create(&ctx, Namespace::new("dev-team", "u2"))
            .await
            .unwrap_err();
        assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));
    }

    #[tokio::test]
    async fn test_decrement_floors_at_zero() {
        let store = store();
        let ctx = RequestContext::new();
        let ns = seed(&store, "ns", "u1").await;
        let tenant = ns.tenant_id.as_str();

        store
            .namespace_increment_device_count(&ctx, tenant, DeviceStatus::Accepted, 2)
            .await
            .unwrap();
        store
            .namespace_increment_device_count(&ctx, tenant, DeviceStatus::Accepted, -5)
            .await
            .unwrap();
        let ns = store
            .namespace_resolve(&ctx, NamespaceResolver::TenantId, tenant, &[])
            .await
            .unwrap();
        assert_eq!(ns.devices_accepted_count, 0);

        let err = store
            .namespace_increment_device_count(&ctx, "missing", DeviceStatus::Accepted, 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_membership_lifecycle() {
        let store = store();
        let ctx = RequestContext::new();
        let ns = seed(&store, "ns", "u1").await;
        let tenant = ns.tenant_id.as_str();

        store
            .namespace_create_membership(&ctx, tenant, Member::new("u2", Role::Observer))
            .await
            .unwrap();
        let err = store
            .namespace_create_membership(&ctx, tenant, Member::new("u2", Role::Observer))
            .await
            .unwrap_err();
        assert_eq!(err.conflicting_fields(), Some(&["members".to_string()][..]));

        store
            .namespace_update_membership(
                &ctx,
                tenant,
                "u2",
                &MemberChanges {
                    role: Some(Role::Operator),
                    status: Some(MemberStatus::Pending),
                },
            )
            .await
            .unwrap();
        let ns = store
            .namespace_resolve(&ctx, NamespaceResolver::TenantId, tenant, &[])
            .await
            .unwrap();
        let member = ns.member("u2").unwrap();
        assert_eq!(member.role, Role::Operator);
        assert_eq!(member.status, MemberStatus::Pending);

        store.namespace_delete_membership(&ctx, tenant, "u2").await.unwrap();
        let err = store
            .namespace_delete_membership(&ctx, tenant, "u2")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_sync_counts_and_cascade_delete() {
        let store = store();
        let ctx = RequestContext::new();
        let ns = seed(&store, "ns", "u1").await;
        let tenant = ns.tenant_id.clone();

        store
            .device_create(&ctx, Device::new(tenant.clone(), "web", "aa"))
            .await
            .unwrap();
        store
            .namespace_increment_device_count(&ctx, tenant.as_str(), DeviceStatus::Pending, 10)
            .await
            .unwrap();

        assert_eq!(store.namespace_sync_device_counts(&ctx).await.unwrap(), 1);
        let synced = store
            .namespace_resolve(&ctx, NamespaceResolver::TenantId, tenant.as_str(), &[])
            .await
            .unwrap();
        assert_eq!(synced.devices_pending_count, 1);

        store.namespace_delete(&ctx, tenant.as_str()).await.unwrap();
        let (devices, total) = store
            .device_list(&ctx, crate::core::DeviceAcceptable::AsFalse, &[])
            .await
            .unwrap();
        assert!(devices.is_empty());
        assert_eq!(total, 0);
        assert!(store.namespace_delete(&ctx, tenant.as_str()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_preferred_namespace_falls_back_to_membership() {
        let store = store();
        let ctx = RequestContext::new();
        let user = store
            .user_create(&ctx, User::new("Jane", "jane", "jane@example.com", "x"))
            .await
            .unwrap();
        let ns = seed(&store, "jane-ns", &user.id).await;

        let preferred = store.namespace_get_preferred(&ctx, &user.id).await.unwrap();
        assert_eq!(preferred.tenant_id, ns.tenant_id);
        assert_eq!(preferred.members[0].email, "jane@example.com");
    }

    #[tokio::test]
    async fn test_invitation_resolves_latest() {
        let store = store();
        let ctx = RequestContext::new();
        let tenant = TenantId::new("t1");

        let mut first = MembershipInvitation::new(tenant.clone(), "u2", "u1", Role::Observer);
        first.created_at = Utc::now() - chrono::Duration::hours(1);
        store.membership_invitation_create(&ctx, first).await.unwrap();
        let second = store
            .membership_invitation_create(
                &ctx,
                MembershipInvitation::new(tenant.clone(), "u2", "u1", Role::Operator),
            )
            .await
            .unwrap();

        store
            .membership_invitation_update(
                &ctx,
                "t1",
                "u2",
                &MembershipInvitationChanges {
                    resend: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let latest = store.membership_invitation_resolve(&ctx, "t1", "u2").await.unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.invitations, 2);

        let scoped = RequestContext::for_tenant("t2");
        assert!(
            store
                .membership_invitation_resolve(&scoped, "t1", "u2")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
