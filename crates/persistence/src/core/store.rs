//! Store capability traits.
//!
//! Every method takes a [`RequestContext`] first. Tenant-owned entities are
//! scoped to the context's tenant when it carries one, so a document owned by
//! another tenant behaves exactly like a missing one. List methods return the
//! selected page together with the total number of matches, which ignores
//! pagination.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::fixtures::Fixture;
use crate::models::{
    ActiveSession, ApiKey, ApiKeyChanges, Device, DeviceChanges, DeviceStatus, Member,
    MemberChanges, MembershipInvitation, MembershipInvitationChanges, Namespace,
    NamespaceChanges, PrivateKey, PublicKey, PublicKeyChanges, Session, SessionChanges,
    SessionEvent, System, Tag, TagTarget, Tunnel, User, UserChanges, UserInfo,
};
use crate::query::{
    ApiKeyConflicts, ApiKeyResolver, Conflicts, DeviceConflicts, DeviceResolver,
    NamespaceConflicts, NamespaceResolver, Paginator, PublicKeyResolver, QueryOption,
    SessionResolver, TagConflicts, TagResolver, UserConflicts, UserResolver,
};
use crate::store::StoreHandle;
use crate::tenant::RequestContext;

/// How a listed device's `acceptable` flag is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAcceptable {
    /// Never acceptable.
    AsFalse,
    /// Acceptable unless already accepted.
    IfNotAccepted,
    /// Acceptable only when removed; used once the namespace is at its device limit.
    FromRemoved,
}

impl DeviceAcceptable {
    /// The flag for a device with `status`.
    pub fn evaluate(&self, status: DeviceStatus) -> bool {
        match self {
            DeviceAcceptable::AsFalse => false,
            DeviceAcceptable::IfNotAccepted => status != DeviceStatus::Accepted,
            DeviceAcceptable::FromRemoved => status == DeviceStatus::Removed,
        }
    }
}

/// Namespace (tenant) storage.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Lists namespaces.
    async fn namespace_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Namespace>, u64)>;

    /// Resolves exactly one namespace.
    async fn namespace_resolve(
        &self,
        ctx: &RequestContext,
        resolver: NamespaceResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Namespace>;

    /// The user's preferred namespace, or the first one they belong to.
    async fn namespace_get_preferred(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> StorageResult<Namespace>;

    /// Creates a namespace.
    ///
    /// The name is lowercased, a tenant id is generated when empty, and the
    /// owner becomes an accepted member with the owner role.
    ///
    /// # Errors
    ///
    /// * `ResourceError::Duplicate` naming `name` or `tenant_id`.
    async fn namespace_create(
        &self,
        ctx: &RequestContext,
        namespace: Namespace,
    ) -> StorageResult<Namespace>;

    /// Reports which probe fields collide with other namespaces.
    async fn namespace_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &NamespaceConflicts,
    ) -> StorageResult<Conflicts>;

    /// Applies changes to a namespace.
    async fn namespace_update(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        changes: &NamespaceChanges,
    ) -> StorageResult<()>;

    /// Adds `delta` to the namespace counter for `status`, never going below zero.
    async fn namespace_increment_device_count(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        status: DeviceStatus,
        delta: i64,
    ) -> StorageResult<()>;

    /// Recomputes every namespace's device counters from the devices.
    ///
    /// Namespaces are processed in batches; cancellation is checked between
    /// batches. Returns the number of namespaces processed.
    async fn namespace_sync_device_counts(&self, ctx: &RequestContext) -> StorageResult<u64>;

    /// Deletes a namespace and everything it owns.
    async fn namespace_delete(&self, ctx: &RequestContext, tenant_id: &str) -> StorageResult<()>;

    /// Deletes several namespaces in one transaction, ignoring unknown ids.
    async fn namespace_delete_many(
        &self,
        ctx: &RequestContext,
        tenant_ids: &[String],
    ) -> StorageResult<u64>;
}

/// Namespace membership storage.
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Adds a member.
    ///
    /// # Errors
    ///
    /// * `ResourceError::Duplicate` naming `members` if the user is already a member.
    async fn namespace_create_membership(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        member: Member,
    ) -> StorageResult<()>;

    /// Changes a member's role or status.
    async fn namespace_update_membership(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
        changes: &MemberChanges,
    ) -> StorageResult<()>;

    /// Removes a member and clears it as the user's preferred namespace.
    async fn namespace_delete_membership(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
    ) -> StorageResult<()>;
}

/// Membership invitation storage.
#[async_trait]
pub trait MembershipInvitationStore: Send + Sync {
    /// Records an invitation.
    async fn membership_invitation_create(
        &self,
        ctx: &RequestContext,
        invitation: MembershipInvitation,
    ) -> StorageResult<MembershipInvitation>;

    /// The most recent invitation of `user_id` to `tenant_id`.
    async fn membership_invitation_resolve(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
    ) -> StorageResult<MembershipInvitation>;

    /// Updates the most recent invitation of `user_id` to `tenant_id`.
    async fn membership_invitation_update(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        user_id: &str,
        changes: &MembershipInvitationChanges,
    ) -> StorageResult<()>;
}

/// Device storage.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Lists devices, computing `acceptable` per device.
    async fn device_list(
        &self,
        ctx: &RequestContext,
        acceptable: DeviceAcceptable,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Device>, u64)>;

    /// Resolves exactly one device.
    async fn device_resolve(
        &self,
        ctx: &RequestContext,
        resolver: DeviceResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Device>;

    /// Creates a device, deriving its uid from tenant and MAC when empty.
    ///
    /// The namespace counter for the device's status is incremented in the
    /// same transaction.
    async fn device_create(&self, ctx: &RequestContext, device: Device) -> StorageResult<Device>;

    /// Reports which probe fields collide with other devices of the tenant.
    async fn device_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &DeviceConflicts,
    ) -> StorageResult<Conflicts>;

    /// Applies changes to a device.
    async fn device_update(
        &self,
        ctx: &RequestContext,
        uid: &str,
        changes: &DeviceChanges,
    ) -> StorageResult<()>;

    /// Moves a device to `status`, moving the namespace counters with it.
    async fn device_update_status(
        &self,
        ctx: &RequestContext,
        uid: &str,
        status: DeviceStatus,
    ) -> StorageResult<()>;

    /// Marks devices as seen at `at`. Returns the number of devices updated.
    async fn device_heartbeat(
        &self,
        ctx: &RequestContext,
        uids: &[String],
        at: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Deletes a device and its sessions.
    async fn device_delete(&self, ctx: &RequestContext, uid: &str) -> StorageResult<()>;

    /// Deletes devices with their sessions, events and tunnels, ignoring
    /// unknown uids. Returns the number of devices deleted.
    async fn device_delete_many(&self, ctx: &RequestContext, uids: &[String])
    -> StorageResult<u64>;

    /// Rewrites references to `old_uid` in sessions and tunnels.
    async fn device_migrate_uid(
        &self,
        ctx: &RequestContext,
        old_uid: &str,
        new_uid: &str,
    ) -> StorageResult<()>;
}

/// Session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Lists sessions.
    async fn session_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Session>, u64)>;

    /// Resolves exactly one session.
    async fn session_resolve(
        &self,
        ctx: &RequestContext,
        resolver: SessionResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Session>;

    /// Creates a session and its active-session record.
    async fn session_create(&self, ctx: &RequestContext, session: Session)
    -> StorageResult<Session>;

    /// Applies changes to a session.
    async fn session_update(
        &self,
        ctx: &RequestContext,
        uid: &str,
        changes: &SessionChanges,
    ) -> StorageResult<()>;

    /// Rewrites the device uid of every session of `old_uid`.
    async fn session_update_device_uid(
        &self,
        ctx: &RequestContext,
        old_uid: &str,
        new_uid: &str,
    ) -> StorageResult<u64>;

    /// Deletes a session with its events and active record.
    async fn session_delete(&self, ctx: &RequestContext, uid: &str) -> StorageResult<()>;

    /// Deletes several sessions, ignoring unknown uids.
    async fn session_delete_many(&self, ctx: &RequestContext, uids: &[String])
    -> StorageResult<u64>;

    /// Deletes sessions started before `before`.
    async fn session_delete_before(
        &self,
        ctx: &RequestContext,
        before: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Records an event and adds its type and seat to the session's sets.
    async fn session_events_create(
        &self,
        ctx: &RequestContext,
        event: SessionEvent,
    ) -> StorageResult<()>;

    /// Lists a session's events in timestamp order.
    async fn session_events_list(
        &self,
        ctx: &RequestContext,
        uid: &str,
        seat: Option<i64>,
        kind: Option<&str>,
        paginator: &Paginator,
    ) -> StorageResult<(Vec<SessionEvent>, u64)>;

    /// Deletes a session's events, optionally only one seat or type.
    async fn session_events_delete(
        &self,
        ctx: &RequestContext,
        uid: &str,
        seat: Option<i64>,
        kind: Option<&str>,
    ) -> StorageResult<u64>;

    /// Resolves a session's active record.
    async fn active_session_resolve(
        &self,
        ctx: &RequestContext,
        uid: &str,
    ) -> StorageResult<ActiveSession>;

    /// Deletes a session's active record.
    async fn active_session_delete(&self, ctx: &RequestContext, uid: &str) -> StorageResult<()>;
}

/// User storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Lists users.
    async fn user_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<User>, u64)>;

    /// Creates a user; email and username are lowercased.
    async fn user_create(&self, ctx: &RequestContext, user: User) -> StorageResult<User>;

    /// Creates a placeholder user in the invited state.
    async fn user_create_invited(&self, ctx: &RequestContext, email: &str) -> StorageResult<User>;

    /// Resolves exactly one user.
    async fn user_resolve(
        &self,
        ctx: &RequestContext,
        resolver: UserResolver,
        value: &str,
    ) -> StorageResult<User>;

    /// Reports which probe fields collide with other users.
    async fn user_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &UserConflicts,
    ) -> StorageResult<Conflicts>;

    /// Applies changes to a user.
    async fn user_update(
        &self,
        ctx: &RequestContext,
        id: &str,
        changes: &UserChanges,
    ) -> StorageResult<()>;

    /// Namespaces the user owns and those they are only a member of.
    async fn user_get_info(&self, ctx: &RequestContext, id: &str) -> StorageResult<UserInfo>;

    /// Deletes a user, their memberships and their invitations.
    async fn user_delete(&self, ctx: &RequestContext, id: &str) -> StorageResult<()>;
}

/// Tag storage and propagation.
///
/// Devices and public keys reference tags by name, so renames and deletions
/// rewrite every referencing document in one transaction.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Creates a tag.
    async fn tag_create(&self, ctx: &RequestContext, tag: Tag) -> StorageResult<Tag>;

    /// Reports which probe fields collide with other tags of the tenant.
    async fn tag_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &TagConflicts,
    ) -> StorageResult<Conflicts>;

    /// Lists tags.
    async fn tag_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Tag>, u64)>;

    /// Resolves exactly one tag.
    async fn tag_resolve(
        &self,
        ctx: &RequestContext,
        resolver: TagResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Tag>;

    /// Renames a tag and every reference to it.
    async fn tag_update(&self, ctx: &RequestContext, id: &str, name: &str) -> StorageResult<()>;

    /// Adds a tag to one target document.
    async fn tag_push_to_target(
        &self,
        ctx: &RequestContext,
        tag_id: &str,
        target: TagTarget,
        target_id: &str,
    ) -> StorageResult<()>;

    /// Removes a tag from the given targets, or from every target of the
    /// kind in the tag's tenant when `target_ids` is empty.
    async fn tag_pull_from_target(
        &self,
        ctx: &RequestContext,
        tag_id: &str,
        target: TagTarget,
        target_ids: &[String],
    ) -> StorageResult<u64>;

    /// Renames a tag within a tenant. Returns the number of referencing
    /// documents updated.
    async fn tags_rename(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> StorageResult<u64>;

    /// Deletes a tag within a tenant. Returns the number of referencing
    /// documents updated.
    async fn tags_delete(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        name: &str,
    ) -> StorageResult<u64>;

    /// Deletes a tag by id together with its references.
    async fn tag_delete(&self, ctx: &RequestContext, id: &str) -> StorageResult<()>;
}

/// API key storage.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Creates an API key.
    async fn api_key_create(&self, ctx: &RequestContext, key: ApiKey) -> StorageResult<ApiKey>;

    /// Resolves exactly one API key. `Id` resolves by digest.
    async fn api_key_resolve(
        &self,
        ctx: &RequestContext,
        resolver: ApiKeyResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<ApiKey>;

    /// Reports which probe fields collide with other keys of the tenant.
    async fn api_key_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &ApiKeyConflicts,
    ) -> StorageResult<Conflicts>;

    /// Lists API keys.
    async fn api_key_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<ApiKey>, u64)>;

    /// Applies changes to an API key.
    async fn api_key_update(
        &self,
        ctx: &RequestContext,
        id: &str,
        changes: &ApiKeyChanges,
    ) -> StorageResult<()>;

    /// Deletes an API key.
    async fn api_key_delete(&self, ctx: &RequestContext, id: &str) -> StorageResult<()>;
}

/// Public key storage.
#[async_trait]
pub trait PublicKeyStore: Send + Sync {
    /// Lists public keys.
    async fn public_key_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<PublicKey>, u64)>;

    /// Resolves exactly one public key.
    async fn public_key_resolve(
        &self,
        ctx: &RequestContext,
        resolver: PublicKeyResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<PublicKey>;

    /// Creates a public key.
    async fn public_key_create(
        &self,
        ctx: &RequestContext,
        key: PublicKey,
    ) -> StorageResult<PublicKey>;

    /// Applies changes and returns the updated key.
    async fn public_key_update(
        &self,
        ctx: &RequestContext,
        fingerprint: &str,
        changes: &PublicKeyChanges,
    ) -> StorageResult<PublicKey>;

    /// Deletes a public key.
    async fn public_key_delete(&self, ctx: &RequestContext, fingerprint: &str)
    -> StorageResult<()>;
}

/// Private key storage.
#[async_trait]
pub trait PrivateKeyStore: Send + Sync {
    /// Stores a private key.
    async fn private_key_create(&self, ctx: &RequestContext, key: PrivateKey) -> StorageResult<()>;

    /// Fetches a private key by fingerprint.
    async fn private_key_get(
        &self,
        ctx: &RequestContext,
        fingerprint: &str,
    ) -> StorageResult<PrivateKey>;
}

/// Instance-wide settings.
#[async_trait]
pub trait SystemStore: Send + Sync {
    /// The stored settings, or the defaults when none were saved.
    async fn system_get(&self, ctx: &RequestContext) -> StorageResult<System>;

    /// Replaces the stored settings.
    async fn system_set(&self, ctx: &RequestContext, system: &System) -> StorageResult<()>;
}

/// Tunnel endpoint storage.
#[async_trait]
pub trait TunnelStore: Send + Sync {
    /// Creates a tunnel.
    async fn tunnel_create(&self, ctx: &RequestContext, tunnel: Tunnel) -> StorageResult<Tunnel>;

    /// Lists tunnels.
    async fn tunnel_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Tunnel>, u64)>;

    /// Deletes a tunnel by address.
    async fn tunnel_delete(&self, ctx: &RequestContext, address: &str) -> StorageResult<()>;

    /// Rewrites the device uid of every tunnel of `old_uid`.
    async fn tunnel_update_device_uid(
        &self,
        ctx: &RequestContext,
        old_uid: &str,
        new_uid: &str,
    ) -> StorageResult<u64>;
}

/// Scoped execution of several store calls as one atomic unit.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Runs `f` in a transaction: an error rolls back every write made
    /// through the handle, success commits them.
    ///
    /// # Errors
    ///
    /// * `TransactionError::StartFailed` if the transaction cannot be opened.
    /// * Whatever `f` returns, unchanged.
    async fn with_transaction<R, F>(&self, ctx: &RequestContext, f: F) -> StorageResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut StoreHandle<'_>) -> StorageResult<R> + Send;
}

/// Bulk data management used by tooling and tests.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    /// Inserts fixture documents as-is.
    async fn load_fixtures(&self, ctx: &RequestContext, fixtures: &[Fixture])
    -> StorageResult<()>;

    /// Removes every document of every collection.
    async fn wipe(&self, ctx: &RequestContext) -> StorageResult<()>;
}

/// Every capability of the fleet store.
pub trait Store:
    NamespaceStore
    + MemberStore
    + MembershipInvitationStore
    + DeviceStore
    + SessionStore
    + UserStore
    + TagStore
    + ApiKeyStore
    + PublicKeyStore
    + PrivateKeyStore
    + SystemStore
    + TunnelStore
    + TransactionStore
    + MaintenanceStore
{
}

impl<T> Store for T where
    T: NamespaceStore
        + MemberStore
        + MembershipInvitationStore
        + DeviceStore
        + SessionStore
        + UserStore
        + TagStore
        + ApiKeyStore
        + PublicKeyStore
        + PrivateKeyStore
        + SystemStore
        + TunnelStore
        + TransactionStore
        + MaintenanceStore
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_acceptable() {
        use DeviceStatus::*;
        let never: Vec<bool> = DeviceStatus::ALL
            .iter()
            .map(|s| DeviceAcceptable::AsFalse.evaluate(*s))
            .collect();
        assert_eq!(never, vec![false; 4]);

        assert!(DeviceAcceptable::IfNotAccepted.evaluate(Pending));
        assert!(DeviceAcceptable::IfNotAccepted.evaluate(Removed));
        assert!(!DeviceAcceptable::IfNotAccepted.evaluate(Accepted));

        assert!(DeviceAcceptable::FromRemoved.evaluate(Removed));
        assert!(!DeviceAcceptable::FromRemoved.evaluate(Pending));
    }
}
