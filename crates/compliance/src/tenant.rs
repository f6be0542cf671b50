//! Writes stay inside the caller's tenant.

use fleet_persistence::StorageError;
use fleet_persistence::core::{
    ApiKeyStore, DeviceAcceptable, DeviceStore, MembershipInvitationStore, PublicKeyStore,
    SessionStore, TagStore, TunnelStore,
};
use fleet_persistence::models::{
    ApiKey, Device, MembershipInvitation, PublicKey, Role, Session, Tag, Tunnel,
};
use fleet_persistence::tenant::{RequestContext, TenantId};

use crate::device::{DEVICE_STAGING, namespace_counts};
use crate::fixtures::{DEVICES, NAMESPACES, TAGS};
use crate::{Provider, TENANT_DEV, TENANT_STAGING, USER_JOHN};

fn assert_out_of_scope<T: std::fmt::Debug>(result: Result<T, StorageError>) {
    match result {
        Err(err) => assert!(err.is_not_found(), "{err}"),
        Ok(created) => panic!("created outside the context tenant: {created:?}"),
    }
}

/// A tenant context cannot create documents owned by another tenant.
pub async fn creates_stay_in_context_tenant<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES, TAGS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let foreign = || TenantId::new(TENANT_STAGING);
    let before = namespace_counts(p, TENANT_STAGING).await;

    assert_out_of_scope(
        store
            .device_create(&dev, Device::new(foreign(), "planted", "ff:ff:ff"))
            .await,
    );
    assert_out_of_scope(store.tag_create(&dev, Tag::new(foreign(), "planted")).await);
    assert_out_of_scope(
        store
            .session_create(&dev, Session::new("planted", foreign(), DEVICE_STAGING, "root"))
            .await,
    );
    assert_out_of_scope(
        store
            .api_key_create(
                &dev,
                ApiKey::new("planted-secret", foreign(), "planted", Role::Observer, USER_JOHN),
            )
            .await,
    );
    assert_out_of_scope(
        store
            .public_key_create(&dev, PublicKey::new(foreign(), "planted", "ZGF0YQ==", "planted"))
            .await,
    );
    assert_out_of_scope(
        store
            .tunnel_create(
                &dev,
                Tunnel::new("planted.tunnel", foreign(), DEVICE_STAGING, "localhost", 22),
            )
            .await,
    );
    assert_out_of_scope(
        store
            .membership_invitation_create(
                &dev,
                MembershipInvitation::new(foreign(), USER_JOHN, USER_JOHN, Role::Observer),
            )
            .await,
    );

    let (_, devices) = store
        .device_list(&staging, DeviceAcceptable::AsFalse, &[])
        .await
        .unwrap();
    assert_eq!(devices, 1);
    let (_, tags) = store.tag_list(&staging, &[]).await.unwrap();
    assert_eq!(tags, 1);
    let (_, sessions) = store.session_list(&staging, &[]).await.unwrap();
    assert_eq!(sessions, 0);
    let (_, keys) = store.api_key_list(&staging, &[]).await.unwrap();
    assert_eq!(keys, 0);
    let (_, keys) = store.public_key_list(&staging, &[]).await.unwrap();
    assert_eq!(keys, 0);
    let (_, tunnels) = store.tunnel_list(&staging, &[]).await.unwrap();
    assert_eq!(tunnels, 0);
    assert_eq!(namespace_counts(p, TENANT_STAGING).await, before);

    // The owning tenant, or an unscoped context, still writes freely.
    store
        .tag_create(&staging, Tag::new(foreign(), "planted"))
        .await
        .unwrap();
    store
        .device_create(
            &RequestContext::new(),
            Device::new(foreign(), "planted", "ff:ff:ff"),
        )
        .await
        .unwrap();
}
