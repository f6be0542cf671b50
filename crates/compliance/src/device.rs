//! Device cases.

use chrono::Utc;
use fleet_persistence::core::{DeviceAcceptable, DeviceStore, NamespaceStore, SessionStore};
use fleet_persistence::models::{Device, DeviceChanges, DeviceInfo, DeviceStatus};
use fleet_persistence::query::{
    DeviceConflicts, DeviceResolver, Filter, NamespaceResolver, Order, QueryOption, Sorter,
};
use fleet_persistence::tenant::{RequestContext, TenantId};

use crate::fixtures::{ACTIVE_SESSIONS, DEVICES, NAMESPACES, SESSIONS};
use crate::{Provider, TENANT_DEV, TENANT_STAGING};

/// `device-1` in `dev`.
pub const DEVICE_1: &str = "2300230e3ca2f637636b4d025d2235269014865db5204b6d115386cbee89809c";
/// `device-2` in `dev`, disconnected.
pub const DEVICE_2: &str = "43810e3ca2f637636b4d025d2235269014865db5204b6d115386cbee89809c2";
/// `device-3` in `dev`, pending.
pub const DEVICE_3: &str = "4fdf0e3ca2f637636b4d025d2235269014865db5204b6d115386cbee89809c3";
/// `device-4` in `dev`, removed.
pub const DEVICE_4: &str = "5600560e3ca2f637636b4d025d2235269014865db5204b6d115386cbee89809c";
/// `device-1` in `staging`.
pub const DEVICE_STAGING: &str = "6a1e0e3ca2f637636b4d025d2235269014865db5204b6d115386cbee89809c5";

pub(crate) async fn namespace_counts<P: Provider>(p: &P, tenant_id: &str) -> [i64; 4] {
    let ns = p
        .store()
        .namespace_resolve(&RequestContext::new(), NamespaceResolver::TenantId, tenant_id, &[])
        .await
        .unwrap();
    [
        ns.devices_pending_count,
        ns.devices_accepted_count,
        ns.devices_rejected_count,
        ns.devices_removed_count,
    ]
}

/// Status prefilter and the three acceptable modes.
pub async fn list_with_status_and_acceptable<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::for_tenant(TENANT_DEV);

    let (pending, total) = store
        .device_list(
            &ctx,
            DeviceAcceptable::IfNotAccepted,
            &[QueryOption::WithDeviceStatus(DeviceStatus::Pending)],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(pending[0].uid, DEVICE_3);
    assert!(pending[0].acceptable);

    let (devices, total) = store
        .device_list(
            &ctx,
            DeviceAcceptable::FromRemoved,
            &[QueryOption::Sort(Sorter::new("name", Order::Asc))],
        )
        .await
        .unwrap();
    assert_eq!(total, 4);
    let acceptable: Vec<(&str, bool)> = devices
        .iter()
        .map(|d| (d.name.as_str(), d.acceptable))
        .collect();
    assert_eq!(
        acceptable,
        vec![
            ("device-1", false),
            ("device-2", false),
            ("device-3", false),
            ("device-4", true),
        ]
    );

    let (devices, _) = store
        .device_list(&ctx, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert!(devices.iter().all(|d| !d.acceptable));
}

/// A tenant context never sees another tenant's devices.
pub async fn list_is_tenant_scoped<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();
    let store = p.store();

    let all = RequestContext::new();
    let (_, total) = store
        .device_list(&all, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(total, 5);

    let (devices, total) = store
        .device_list(
            &all,
            DeviceAcceptable::AsFalse,
            &[QueryOption::InNamespace(TenantId::new(TENANT_STAGING))],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(devices[0].uid, DEVICE_STAGING);

    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let (_, total) = store
        .device_list(&staging, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(total, 1);

    let dev = RequestContext::for_tenant(TENANT_DEV);
    let (_, total) = store
        .device_list(
            &dev,
            DeviceAcceptable::AsFalse,
            &[QueryOption::InNamespace(TenantId::new(TENANT_STAGING))],
        )
        .await
        .unwrap();
    assert_eq!(total, 0);

    let err = store
        .device_resolve(
            &dev,
            DeviceResolver::Uid,
            DEVICE_STAGING,
            &[QueryOption::InNamespace(TenantId::new(TENANT_STAGING))],
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Uid, hostname and MAC keys, scoped by the context.
pub async fn resolve_by_keys<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let by_uid = store
        .device_resolve(&dev, DeviceResolver::Uid, DEVICE_1, &[])
        .await
        .unwrap();
    assert_eq!(by_uid.name, "device-1");
    assert_eq!(by_uid.info.unwrap().pretty_name, "Ubuntu 22.04");

    let by_name = store
        .device_resolve(&staging, DeviceResolver::Hostname, "device-1", &[])
        .await
        .unwrap();
    assert_eq!(by_name.uid, DEVICE_STAGING);

    let by_mac = store
        .device_resolve(&dev, DeviceResolver::Mac, "mac-4", &[])
        .await
        .unwrap();
    assert_eq!(by_mac.uid, DEVICE_4);
    assert_eq!(by_mac.status, DeviceStatus::Removed);

    let err = store
        .device_resolve(&staging, DeviceResolver::Uid, DEVICE_1, &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// The uid derives from tenant and MAC; the pending counter follows.
pub async fn create_derives_uid_and_counts<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::for_tenant(TENANT_DEV);
    let tenant = TenantId::new(TENANT_DEV);

    let created = store
        .device_create(&ctx, Device::new(tenant.clone(), "device-new", "aa:bb:cc"))
        .await
        .unwrap();
    assert_eq!(created.uid, Device::derive_uid(&tenant, "aa:bb:cc"));
    assert_eq!(namespace_counts(p, TENANT_DEV).await, [2, 2, 0, 1]);

    let err = store
        .device_create(&ctx, Device::new(tenant.clone(), "device-new", "dd:ee:ff"))
        .await
        .unwrap_err();
    assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));

    let err = store
        .device_create(&ctx, Device::new(tenant.clone(), "other", "aa:bb:cc"))
        .await
        .unwrap_err();
    assert_eq!(err.conflicting_fields(), Some(&["uid".to_string()][..]));

    assert_eq!(namespace_counts(p, TENANT_DEV).await, [2, 2, 0, 1]);
}

/// Device probes are checked inside the caller's tenant.
pub async fn conflicts<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    let taken = store
        .device_conflicts(
            &dev,
            &DeviceConflicts {
                name: "device-2".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(taken.fields, vec!["name"]);

    let itself = store
        .device_conflicts(
            &dev,
            &DeviceConflicts {
                uid: Some(DEVICE_2.into()),
                name: "device-2".into(),
            },
        )
        .await
        .unwrap();
    assert!(!itself.has_conflicts());

    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let elsewhere = store
        .device_conflicts(
            &staging,
            &DeviceConflicts {
                name: "device-2".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!elsewhere.has_conflicts());
}

/// Partial updates, reconnection and heartbeats.
pub async fn update_and_heartbeat<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    store
        .device_update(
            &dev,
            DEVICE_2,
            &DeviceChanges {
                name: Some("renamed".into()),
                info: Some(DeviceInfo {
                    id: "debian".into(),
                    ..Default::default()
                }),
                disconnected_at: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let updated = store
        .device_resolve(&dev, DeviceResolver::Uid, DEVICE_2, &[])
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.info.unwrap().id, "debian");
    assert!(updated.disconnected_at.is_none());
    assert_eq!(updated.tags, vec!["production"]);

    let err = store
        .device_update(
            &dev,
            DEVICE_STAGING,
            &DeviceChanges {
                name: Some("stolen".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let uids = vec![
        DEVICE_1.to_string(),
        DEVICE_STAGING.to_string(),
        "unknown".to_string(),
    ];
    let now = Utc::now();
    assert_eq!(store.device_heartbeat(&dev, &uids, now).await.unwrap(), 1);
    assert_eq!(
        store
            .device_heartbeat(&RequestContext::new(), &uids, now)
            .await
            .unwrap(),
        2
    );
    let seen = store
        .device_resolve(&dev, DeviceResolver::Uid, DEVICE_1, &[])
        .await
        .unwrap();
    assert_eq!(seen.last_seen.timestamp_millis(), now.timestamp_millis());
    assert!(seen.is_online(now));
}

/// A status change moves one unit between counters.
pub async fn update_status_moves_counters<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    store
        .device_update_status(&dev, DEVICE_3, DeviceStatus::Accepted)
        .await
        .unwrap();
    assert_eq!(namespace_counts(p, TENANT_DEV).await, [0, 3, 0, 1]);

    store
        .device_update_status(&dev, DEVICE_3, DeviceStatus::Accepted)
        .await
        .unwrap();
    assert_eq!(namespace_counts(p, TENANT_DEV).await, [0, 3, 0, 1]);

    store
        .device_update_status(&dev, DEVICE_1, DeviceStatus::Rejected)
        .await
        .unwrap();
    assert_eq!(namespace_counts(p, TENANT_DEV).await, [0, 2, 1, 1]);

    let (rejected, _) = store
        .device_list(
            &dev,
            DeviceAcceptable::AsFalse,
            &[QueryOption::WithDeviceStatus(DeviceStatus::Rejected)],
        )
        .await
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].uid, DEVICE_1);

    let err = store
        .device_update_status(&dev, "unknown", DeviceStatus::Accepted)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Deleting a device removes its sessions and active records.
pub async fn delete_cascades_sessions<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES, SESSIONS, ACTIVE_SESSIONS])
        .await
        .unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    store.device_delete(&dev, DEVICE_1).await.unwrap();

    let (sessions, total) = store.session_list(&dev, &[]).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(sessions[0].device_uid, DEVICE_2);
    let err = store
        .active_session_resolve(&dev, crate::session::SESSION_1)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(namespace_counts(p, TENANT_DEV).await, [1, 1, 0, 1]);

    let err = store.device_delete(&dev, DEVICE_1).await.unwrap_err();
    assert!(err.is_not_found());
    let err = store
        .device_delete(&dev, DEVICE_STAGING)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Unknown uids are skipped, known ones are counted.
pub async fn delete_many_ignores_unknown<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    let deleted = store
        .device_delete_many(
            &dev,
            &[
                DEVICE_3.to_string(),
                DEVICE_4.to_string(),
                "unknown".to_string(),
                DEVICE_STAGING.to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let (_, total) = store
        .device_list(&dev, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(namespace_counts(p, TENANT_DEV).await, [0, 2, 0, 0]);
}

/// Sessions follow a device to its new uid.
pub async fn migrate_uid<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES, SESSIONS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    store
        .device_migrate_uid(&dev, DEVICE_1, "migrated")
        .await
        .unwrap();

    let (_, moved) = store
        .session_list(
            &dev,
            &[QueryOption::Match(vec![Filter::property(
                "device_uid",
                "eq",
                "migrated",
            )])],
        )
        .await
        .unwrap();
    assert_eq!(moved, 2);
    let (_, left) = store
        .session_list(
            &dev,
            &[QueryOption::Match(vec![Filter::property(
                "device_uid",
                "eq",
                DEVICE_1,
            )])],
        )
        .await
        .unwrap();
    assert_eq!(left, 0);
}
