//! Namespace, membership and invitation cases.

use fleet_persistence::core::{
    DeviceAcceptable, DeviceStore, MemberStore, MembershipInvitationStore, NamespaceStore,
    TagStore, UserStore,
};
use fleet_persistence::models::{
    DeviceStatus, InvitationStatus, Member, MemberChanges, MembershipInvitationChanges, Namespace,
    NamespaceChanges, Role,
};
use fleet_persistence::query::{
    Enrichment, Filter, NamespaceConflicts, NamespaceResolver, Order, Paginator, QueryOption,
    Sorter, UserResolver,
};
use fleet_persistence::tenant::{RequestContext, TenantId};

use crate::fixtures::{
    API_KEYS, DEVICES, MEMBERSHIP_INVITATIONS, NAMESPACES, SESSIONS, TAGS, USERS,
};
use crate::{Provider, TENANT_DEV, TENANT_STAGING, USER_ALEX, USER_BOB, USER_JANE, USER_JOHN};

/// Filters, pagination and the members-data enrichment.
pub async fn list_with_filters_and_members_data<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let (namespaces, total) = store
        .namespace_list(
            &ctx,
            &[
                QueryOption::Match(vec![Filter::property("name", "contains", "DEV")]),
                QueryOption::Enrich(Enrichment::MembersData),
            ],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(namespaces[0].name, "dev");
    let owner = namespaces[0].member(USER_JOHN).unwrap();
    assert_eq!(owner.email, "john.doe@test.com");
    assert_eq!(owner.username, "john_doe");

    let (page, total) = store
        .namespace_list(
            &ctx,
            &[
                QueryOption::Sort(Sorter::new("name", Order::Desc)),
                QueryOption::Paginate(Paginator::new(1, 1)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "staging");
    assert!(page[0].members.iter().all(|m| m.email.is_empty()));
}

/// Both resolver keys, enrichment on resolve and the missing case.
pub async fn resolve_by_tenant_and_name<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let staging = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_STAGING, &[])
        .await
        .unwrap();
    assert_eq!(staging.name, "staging");
    assert_eq!(staging.max_devices, 3);

    let dev = store
        .namespace_resolve(&ctx, NamespaceResolver::Name, "DEV", &[])
        .await
        .unwrap();
    assert_eq!(dev.tenant_id, TenantId::new(TENANT_DEV));

    store
        .namespace_increment_device_count(&ctx, TENANT_DEV, DeviceStatus::Accepted, 5)
        .await
        .unwrap();
    let stale = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert_eq!(stale.devices_accepted_count, 7);
    let counted = store
        .namespace_resolve(
            &ctx,
            NamespaceResolver::TenantId,
            TENANT_DEV,
            &[QueryOption::Enrich(Enrichment::AcceptedDeviceCount)],
        )
        .await
        .unwrap();
    assert_eq!(counted.devices_accepted_count, 2);

    let err = store
        .namespace_resolve(&ctx, NamespaceResolver::Name, "nonexistent", &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Preference first, then the oldest membership.
pub async fn get_preferred_falls_back_to_first_membership<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let jane = store.namespace_get_preferred(&ctx, USER_JANE).await.unwrap();
    assert_eq!(jane.tenant_id.as_str(), TENANT_DEV);
    assert_eq!(jane.member(USER_JANE).unwrap().email, "jane.smith@test.com");

    let john = store.namespace_get_preferred(&ctx, USER_JOHN).await.unwrap();
    assert_eq!(john.tenant_id.as_str(), TENANT_DEV);

    let bob = store.namespace_get_preferred(&ctx, USER_BOB).await.unwrap();
    assert_eq!(bob.tenant_id.as_str(), TENANT_STAGING);

    let err = store.namespace_get_preferred(&ctx, USER_ALEX).await.unwrap_err();
    assert!(err.is_not_found());
    let err = store.namespace_get_preferred(&ctx, "unknown").await.unwrap_err();
    assert!(err.is_not_found());
}

/// Creation lowercases the name, generates a tenant id and adds the owner.
pub async fn create_normalizes_and_adds_owner<P: Provider>(p: &P) {
    let store = p.store();
    let ctx = RequestContext::new();

    let created = store
        .namespace_create(&ctx, Namespace::new(" New-Space ", USER_ALEX))
        .await
        .unwrap();
    assert_eq!(created.name, "new-space");
    assert!(!created.tenant_id.is_empty());
    assert_eq!(created.members.len(), 1);
    assert_eq!(created.member(USER_ALEX).unwrap().role, Role::Owner);

    let resolved = store
        .namespace_resolve(&ctx, NamespaceResolver::Name, "NEW-SPACE", &[])
        .await
        .unwrap();
    assert_eq!(resolved.tenant_id, created.tenant_id);
    assert_eq!(resolved.max_devices, -1);
}

/// Names and tenant ids are globally unique.
pub async fn create_rejects_duplicates<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let err = store
        .namespace_create(&ctx, Namespace::new("DEV", USER_ALEX))
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));

    let mut same_tenant = Namespace::new("unique", USER_ALEX);
    same_tenant.tenant_id = TenantId::new(TENANT_DEV);
    let err = store.namespace_create(&ctx, same_tenant).await.unwrap_err();
    assert_eq!(err.conflicting_fields(), Some(&["tenant_id".to_string()][..]));

    let (_, total) = store.namespace_list(&ctx, &[]).await.unwrap();
    assert_eq!(total, 2);
}

/// Probe semantics: empty, self and collision.
pub async fn conflicts<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let empty = store
        .namespace_conflicts(&ctx, &NamespaceConflicts::default())
        .await
        .unwrap();
    assert!(!empty.has_conflicts());

    let taken = store
        .namespace_conflicts(
            &ctx,
            &NamespaceConflicts {
                name: "Dev".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(taken.fields, vec!["name"]);

    let itself = store
        .namespace_conflicts(
            &ctx,
            &NamespaceConflicts {
                tenant_id: Some(TENANT_DEV.into()),
                name: "dev".into(),
            },
        )
        .await
        .unwrap();
    assert!(!itself.has_conflicts());

    let free = store
        .namespace_conflicts(
            &ctx,
            &NamespaceConflicts {
                name: "free".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!free.has_conflicts());
}

/// Partial updates touch only the given fields.
pub async fn update<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store
        .namespace_update(
            &ctx,
            TENANT_DEV,
            &NamespaceChanges {
                name: Some("Renamed".into()),
                max_devices: Some(10),
                session_record: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let updated = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.max_devices, 10);
    assert!(!updated.settings.session_record);
    assert_eq!(updated.owner, USER_JOHN);

    let err = store
        .namespace_update(
            &ctx,
            "unknown",
            &NamespaceChanges {
                max_devices: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let err = store
        .namespace_update(&ctx, "unknown", &NamespaceChanges::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Counters floor at zero and missing namespaces are reported.
pub async fn increment_device_count_never_goes_negative<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store
        .namespace_increment_device_count(&ctx, TENANT_DEV, DeviceStatus::Pending, -3)
        .await
        .unwrap();
    let ns = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert_eq!(ns.devices_pending_count, 0);

    store
        .namespace_increment_device_count(&ctx, TENANT_DEV, DeviceStatus::Pending, 2)
        .await
        .unwrap();
    store
        .namespace_increment_device_count(&ctx, TENANT_DEV, DeviceStatus::Pending, -1)
        .await
        .unwrap();
    let ns = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert_eq!(ns.devices_pending_count, 1);

    let err = store
        .namespace_increment_device_count(&ctx, "unknown", DeviceStatus::Pending, 1)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Recounting restores every counter from the devices.
pub async fn sync_device_counts<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store
        .namespace_increment_device_count(&ctx, TENANT_DEV, DeviceStatus::Rejected, 4)
        .await
        .unwrap();
    store
        .namespace_increment_device_count(&ctx, TENANT_STAGING, DeviceStatus::Pending, -1)
        .await
        .unwrap();

    assert_eq!(store.namespace_sync_device_counts(&ctx).await.unwrap(), 2);

    let dev = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert_eq!(dev.devices_accepted_count, 2);
    assert_eq!(dev.devices_pending_count, 1);
    assert_eq!(dev.devices_rejected_count, 0);
    assert_eq!(dev.devices_removed_count, 1);

    let staging = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_STAGING, &[])
        .await
        .unwrap();
    assert_eq!(staging.devices_pending_count, 1);
}

/// Deleting a namespace removes what it owns and nothing else.
pub async fn delete_cascades<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES, DEVICES, SESSIONS, TAGS, API_KEYS])
        .await
        .unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store.namespace_delete(&ctx, TENANT_DEV).await.unwrap();

    let dev = RequestContext::for_tenant(TENANT_DEV);
    let (_, devices) = store
        .device_list(&dev, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(devices, 0);
    let (_, tags) = store.tag_list(&dev, &[]).await.unwrap();
    assert_eq!(tags, 0);

    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let (_, devices) = store
        .device_list(&staging, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(devices, 1);

    let jane = store
        .user_resolve(&ctx, UserResolver::Id, USER_JANE)
        .await
        .unwrap();
    assert!(jane.preferences.preferred_namespace.is_empty());

    let err = store.namespace_delete(&ctx, TENANT_DEV).await.unwrap_err();
    assert!(err.is_not_found());

    let deleted = store
        .namespace_delete_many(&ctx, &[TENANT_STAGING.to_string(), "unknown".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let (_, total) = store.namespace_list(&ctx, &[]).await.unwrap();
    assert_eq!(total, 0);
}

/// Add, change and remove a member.
pub async fn membership_lifecycle<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store
        .namespace_create_membership(&ctx, TENANT_DEV, Member::new(USER_ALEX, Role::Operator))
        .await
        .unwrap();
    let err = store
        .namespace_create_membership(&ctx, TENANT_DEV, Member::new(USER_ALEX, Role::Observer))
        .await
        .unwrap_err();
    assert_eq!(err.conflicting_fields(), Some(&["members".to_string()][..]));
    let err = store
        .namespace_create_membership(&ctx, "unknown", Member::new(USER_ALEX, Role::Observer))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    store
        .namespace_update_membership(
            &ctx,
            TENANT_DEV,
            USER_ALEX,
            &MemberChanges {
                role: Some(Role::Administrator),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let dev = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert_eq!(dev.members.len(), 3);
    assert_eq!(dev.member(USER_ALEX).unwrap().role, Role::Administrator);
    assert_eq!(dev.member(USER_JANE).unwrap().role, Role::Observer);

    let err = store
        .namespace_update_membership(
            &ctx,
            TENANT_STAGING,
            USER_ALEX,
            &MemberChanges {
                role: Some(Role::Observer),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    store
        .namespace_delete_membership(&ctx, TENANT_DEV, USER_JANE)
        .await
        .unwrap();
    let jane = store
        .user_resolve(&ctx, UserResolver::Id, USER_JANE)
        .await
        .unwrap();
    assert!(jane.preferences.preferred_namespace.is_empty());
    let preferred = store.namespace_get_preferred(&ctx, USER_JANE).await.unwrap();
    assert_eq!(preferred.tenant_id.as_str(), TENANT_STAGING);

    let err = store
        .namespace_delete_membership(&ctx, TENANT_DEV, USER_JANE)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// The latest invitation wins and updates apply to it.
pub async fn invitations_resolve_latest<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES, MEMBERSHIP_INVITATIONS])
        .await
        .unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let latest = store
        .membership_invitation_resolve(&ctx, TENANT_DEV, USER_ALEX)
        .await
        .unwrap();
    assert_eq!(latest.id, "507f1f77bcf86cd799439101");
    assert_eq!(latest.status, InvitationStatus::Pending);
    assert_eq!(latest.role, Role::Observer);

    store
        .membership_invitation_update(
            &ctx,
            TENANT_DEV,
            USER_ALEX,
            &MembershipInvitationChanges {
                status: Some(InvitationStatus::Accepted),
                resend: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let updated = store
        .membership_invitation_resolve(&ctx, TENANT_DEV, USER_ALEX)
        .await
        .unwrap();
    assert_eq!(updated.id, latest.id);
    assert_eq!(updated.status, InvitationStatus::Accepted);
    assert_eq!(updated.invitations, 2);
    assert!(updated.status_updated_at > latest.status_updated_at);

    let err = store
        .membership_invitation_resolve(&ctx, TENANT_STAGING, USER_ALEX)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let other = RequestContext::for_tenant(TENANT_STAGING);
    let err = store
        .membership_invitation_resolve(&other, TENANT_DEV, USER_ALEX)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
