//! API key, public key, private key, system and tunnel cases.

use chrono::Utc;
use fleet_persistence::core::{
    ApiKeyStore, PrivateKeyStore, PublicKeyStore, SystemStore, TunnelStore,
};
use fleet_persistence::models::{
    ApiKey, ApiKeyChanges, PrivateKey, PublicKey, PublicKeyChanges, PublicKeyFilter, Role, Tunnel,
};
use fleet_persistence::query::{
    ApiKeyConflicts, ApiKeyResolver, Filter, Order, PublicKeyResolver, QueryOption, Sorter,
};
use fleet_persistence::tenant::{RequestContext, TenantId};

use crate::device::{DEVICE_1, DEVICE_2};
use crate::fixtures::{API_KEYS, PUBLIC_KEYS};
use crate::{Provider, TENANT_DEV, TENANT_STAGING, USER_JOHN};

const DEV_KEY: &str = "f23a2e56cd3fcfba002c72675c870e1e7813292acc2db75e1f3b1a6c7d8f1a42";

/// API keys are stored by digest and unique by name per tenant.
pub async fn api_key_lifecycle<P: Provider>(p: &P) {
    p.load_fixtures(&[API_KEYS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let (keys, total) = store
        .api_key_list(&dev, &[QueryOption::Sort(Sorter::new("name", Order::Desc))])
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(keys[0].name, "prod");
    assert_eq!(keys[0].role, Role::Operator);

    let created = store
        .api_key_create(
            &dev,
            ApiKey::new("raw-secret", TenantId::new(TENANT_DEV), "ci", Role::Observer, USER_JOHN),
        )
        .await
        .unwrap();
    assert_eq!(created.id, ApiKey::digest("raw-secret"));
    let resolved = store
        .api_key_resolve(&dev, ApiKeyResolver::Id, &ApiKey::digest("raw-secret"), &[])
        .await
        .unwrap();
    assert_eq!(resolved.name, "ci");
    let err = store
        .api_key_resolve(&staging, ApiKeyResolver::Name, "ci", &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = store
        .api_key_create(
            &dev,
            ApiKey::new("other-secret", TenantId::new(TENANT_DEV), "dev", Role::Observer, USER_JOHN),
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    store
        .api_key_create(
            &staging,
            ApiKey::new("other-secret", TenantId::new(TENANT_STAGING), "dev", Role::Observer, USER_JOHN),
        )
        .await
        .unwrap();

    let conflicts = store
        .api_key_conflicts(
            &dev,
            &ApiKeyConflicts {
                id: DEV_KEY.into(),
                name: "prod".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(conflicts.into_parts().0, vec!["id", "name"]);

    store
        .api_key_update(
            &dev,
            DEV_KEY,
            &ApiKeyChanges {
                name: Some("development".into()),
                role: Some(Role::Operator),
            },
        )
        .await
        .unwrap();
    let renamed = store
        .api_key_resolve(&dev, ApiKeyResolver::Name, "development", &[])
        .await
        .unwrap();
    assert_eq!(renamed.id, DEV_KEY);
    assert_eq!(renamed.role, Role::Operator);

    let err = store
        .api_key_update(
            &dev,
            DEV_KEY,
            &ApiKeyChanges {
                name: Some("prod".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    store.api_key_delete(&dev, DEV_KEY).await.unwrap();
    let err = store.api_key_delete(&dev, DEV_KEY).await.unwrap_err();
    assert!(err.is_not_found());
    let err = store
        .api_key_update(&dev, DEV_KEY, &ApiKeyChanges::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Public keys are unique by fingerprint per tenant.
pub async fn public_key_lifecycle<P: Provider>(p: &P) {
    p.load_fixtures(&[PUBLIC_KEYS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let (keys, total) = store
        .public_key_list(
            &dev,
            &[QueryOption::Match(vec![Filter::property(
                "username", "eq", "root",
            )])],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(keys[0].fingerprint, "fingerprint-2");
    assert_eq!(keys[0].filter.hostname, ".*");

    let err = store
        .public_key_create(
            &dev,
            PublicKey::new(TenantId::new(TENANT_DEV), "fingerprint-1", "ZGF0YQ==", "copy"),
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    store
        .public_key_create(
            &staging,
            PublicKey::new(TenantId::new(TENANT_STAGING), "fingerprint-1", "ZGF0YQ==", "copy"),
        )
        .await
        .unwrap();
    let (_, total) = store.public_key_list(&staging, &[]).await.unwrap();
    assert_eq!(total, 1);

    let updated = store
        .public_key_update(
            &dev,
            "fingerprint-1",
            &PublicKeyChanges {
                username: Some("admin".into()),
                filter: Some(PublicKeyFilter {
                    hostname: "^web-".into(),
                    tags: Vec::new(),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.username, "admin");
    assert_eq!(updated.name, "public_key-1");
    assert!(updated.filter.tags.is_empty());
    let resolved = store
        .public_key_resolve(&dev, PublicKeyResolver::Fingerprint, "fingerprint-1", &[])
        .await
        .unwrap();
    assert_eq!(resolved, updated);

    let err = store
        .public_key_update(&dev, "unknown", &PublicKeyChanges::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    store.public_key_delete(&dev, "fingerprint-1").await.unwrap();
    let err = store
        .public_key_delete(&dev, "fingerprint-1")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    store
        .public_key_resolve(&staging, PublicKeyResolver::Fingerprint, "fingerprint-1", &[])
        .await
        .unwrap();
}

/// Private keys are global and unique by fingerprint.
pub async fn private_keys<P: Provider>(p: &P) {
    let store = p.store();
    let ctx = RequestContext::new();
    let key = PrivateKey {
        fingerprint: "private-1".into(),
        data: "c2VjcmV0".into(),
        created_at: Utc::now(),
    };

    store.private_key_create(&ctx, key.clone()).await.unwrap();
    let fetched = store.private_key_get(&ctx, "private-1").await.unwrap();
    assert_eq!(fetched.data, key.data);
    assert_eq!(
        fetched.created_at.timestamp_millis(),
        key.created_at.timestamp_millis()
    );

    let err = store.private_key_create(&ctx, key).await.unwrap_err();
    assert!(err.is_duplicate());
    let err = store.private_key_get(&ctx, "unknown").await.unwrap_err();
    assert!(err.is_not_found());
}

/// Instance settings default until saved; tunnels follow their device.
pub async fn system_and_tunnels<P: Provider>(p: &P) {
    let store = p.store();
    let ctx = RequestContext::new();

    let system = store.system_get(&ctx).await.unwrap();
    assert!(!system.setup);
    assert!(system.authentication.local);
    let mut configured = system;
    configured.setup = true;
    configured.authentication.saml = true;
    store.system_set(&ctx, &configured).await.unwrap();
    assert_eq!(store.system_get(&ctx).await.unwrap(), configured);

    let dev = RequestContext::for_tenant(TENANT_DEV);
    for (address, port) in [("a.tunnel", 80), ("b.tunnel", 8080)] {
        store
            .tunnel_create(
                &dev,
                Tunnel::new(address, TenantId::new(TENANT_DEV), DEVICE_1, "localhost", port),
            )
            .await
            .unwrap();
    }
    let err = store
        .tunnel_create(
            &dev,
            Tunnel::new("a.tunnel", TenantId::new(TENANT_DEV), DEVICE_1, "localhost", 22),
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    let moved = store
        .tunnel_update_device_uid(&dev, DEVICE_1, DEVICE_2)
        .await
        .unwrap();
    assert_eq!(moved, 2);
    let (tunnels, total) = store
        .tunnel_list(&dev, &[QueryOption::Sort(Sorter::new("port", Order::Desc))])
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(tunnels[0].port, 8080);
    assert!(tunnels.iter().all(|t| t.device_uid == DEVICE_2));

    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let (_, total) = store.tunnel_list(&staging, &[]).await.unwrap();
    assert_eq!(total, 0);
    let err = store.tunnel_delete(&staging, "a.tunnel").await.unwrap_err();
    assert!(err.is_not_found());
    store.tunnel_delete(&dev, "a.tunnel").await.unwrap();
}
