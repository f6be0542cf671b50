//! Tag cases, including the references held by devices and public keys.

use fleet_persistence::core::{DeviceStore, PublicKeyStore, TagStore};
use fleet_persistence::models::{Tag, TagTarget};
use fleet_persistence::query::{
    DeviceResolver, Order, PublicKeyResolver, QueryOption, Sorter, TagConflicts, TagResolver,
};
use fleet_persistence::tenant::{RequestContext, TenantId};

use crate::device::{DEVICE_1, DEVICE_2, DEVICE_3, DEVICE_STAGING};
use crate::fixtures::{DEVICES, PUBLIC_KEYS, TAGS};
use crate::{Provider, TENANT_DEV, TENANT_STAGING};

const PRODUCTION: &str = "6791d3ae04ba86e6d7a0514d";
const DEVELOPMENT: &str = "6791d3be5a201d874c4c2885";
const OWNERS: &str = "6791d3c2a62aafaefe821ab3";
const PRODUCTION_STAGING: &str = "6791d3c2a62aafaefe821ab4";

async fn device_tags<P: Provider>(p: &P, ctx: &RequestContext, uid: &str) -> Vec<String> {
    let mut tags = p
        .store()
        .device_resolve(ctx, DeviceResolver::Uid, uid, &[])
        .await
        .unwrap()
        .tags;
    tags.sort();
    tags
}

async fn key_tags<P: Provider>(p: &P, ctx: &RequestContext, fingerprint: &str) -> Vec<String> {
    let mut tags = p
        .store()
        .public_key_resolve(ctx, PublicKeyResolver::Fingerprint, fingerprint, &[])
        .await
        .unwrap()
        .filter
        .tags;
    tags.sort();
    tags
}

/// Listing and resolution stay inside the caller's tenant.
pub async fn list_and_resolve<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let (tags, total) = store
        .tag_list(&dev, &[QueryOption::Sort(Sorter::new("name", Order::Asc))])
        .await
        .unwrap();
    assert_eq!(total, 3);
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["development", "owners", "production"]);

    let prod = store
        .tag_resolve(&dev, TagResolver::Name, "production", &[])
        .await
        .unwrap();
    assert_eq!(prod.id, PRODUCTION);
    let prod = store
        .tag_resolve(&staging, TagResolver::Name, "production", &[])
        .await
        .unwrap();
    assert_eq!(prod.id, PRODUCTION_STAGING);

    let owners = store
        .tag_resolve(&dev, TagResolver::Id, OWNERS, &[])
        .await
        .unwrap();
    assert_eq!(owners.name, "owners");
    let err = store
        .tag_resolve(&staging, TagResolver::Id, OWNERS, &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Names are unique per tenant only.
pub async fn create_rejects_duplicates<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let err = store
        .tag_create(&dev, Tag::new(TenantId::new(TENANT_DEV), "production"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    let created = store
        .tag_create(&staging, Tag::new(TenantId::new(TENANT_STAGING), "owners"))
        .await
        .unwrap();
    assert!(!created.id.is_empty());
    let (_, total) = store.tag_list(&staging, &[]).await.unwrap();
    assert_eq!(total, 2);

    let taken = store
        .tag_conflicts(
            &dev,
            &TagConflicts {
                name: "production".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(taken.has_conflicts());
    let itself = store
        .tag_conflicts(
            &dev,
            &TagConflicts {
                id: Some(PRODUCTION.into()),
                name: "production".into(),
            },
        )
        .await
        .unwrap();
    assert!(!itself.has_conflicts());
    let free = store
        .tag_conflicts(
            &dev,
            &TagConflicts {
                name: "qa".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!free.has_conflicts());
}

/// Pushing is idempotent; pulling reports the documents it changed.
pub async fn push_and_pull<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS, DEVICES, PUBLIC_KEYS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    for _ in 0..2 {
        store
            .tag_push_to_target(&dev, OWNERS, TagTarget::Device, DEVICE_3)
            .await
            .unwrap();
    }
    assert_eq!(device_tags(p, &dev, DEVICE_3).await, vec!["owners"]);

    store
        .tag_push_to_target(&dev, OWNERS, TagTarget::PublicKey, "fingerprint-2")
        .await
        .unwrap();
    assert_eq!(key_tags(p, &dev, "fingerprint-2").await, vec!["owners"]);

    let err = store
        .tag_push_to_target(&dev, OWNERS, TagTarget::Device, "unknown")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let err = store
        .tag_push_to_target(&dev, "unknown", TagTarget::Device, DEVICE_3)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let pulled = store
        .tag_pull_from_target(&dev, OWNERS, TagTarget::Device, &[DEVICE_3.to_string()])
        .await
        .unwrap();
    assert_eq!(pulled, 1);
    assert!(device_tags(p, &dev, DEVICE_3).await.is_empty());
    let pulled = store
        .tag_pull_from_target(&dev, OWNERS, TagTarget::Device, &[DEVICE_3.to_string()])
        .await
        .unwrap();
    assert_eq!(pulled, 0);
}

/// An empty target list pulls from every target of the tenant.
pub async fn pull_from_every_target<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS, DEVICES, PUBLIC_KEYS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let pulled = store
        .tag_pull_from_target(&dev, PRODUCTION, TagTarget::Device, &[])
        .await
        .unwrap();
    assert_eq!(pulled, 2);
    assert_eq!(device_tags(p, &dev, DEVICE_1).await, vec!["development"]);
    assert!(device_tags(p, &dev, DEVICE_2).await.is_empty());
    assert_eq!(
        device_tags(p, &staging, DEVICE_STAGING).await,
        vec!["production"]
    );
    assert_eq!(
        key_tags(p, &dev, "fingerprint-1").await,
        vec!["development", "production"]
    );

    let pulled = store
        .tag_pull_from_target(&dev, DEVELOPMENT, TagTarget::PublicKey, &[])
        .await
        .unwrap();
    assert_eq!(pulled, 1);
    assert_eq!(key_tags(p, &dev, "fingerprint-1").await, vec!["production"]);
}

/// Renaming rewrites devices and public keys of the tag's tenant.
pub async fn rename_touches_every_target<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS, DEVICES, PUBLIC_KEYS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let updated = store
        .tags_rename(&dev, TENANT_DEV, "production", "prod")
        .await
        .unwrap();
    assert_eq!(updated, 3);
    assert_eq!(
        device_tags(p, &dev, DEVICE_1).await,
        vec!["development", "prod"]
    );
    assert_eq!(device_tags(p, &dev, DEVICE_2).await, vec!["prod"]);
    assert_eq!(
        key_tags(p, &dev, "fingerprint-1").await,
        vec!["development", "prod"]
    );
    let renamed = store
        .tag_resolve(&dev, TagResolver::Id, PRODUCTION, &[])
        .await
        .unwrap();
    assert_eq!(renamed.name, "prod");

    let untouched = store
        .tag_resolve(&staging, TagResolver::Name, "production", &[])
        .await
        .unwrap();
    assert_eq!(untouched.id, PRODUCTION_STAGING);
    assert_eq!(
        device_tags(p, &staging, DEVICE_STAGING).await,
        vec!["production"]
    );

    store.tag_update(&dev, DEVELOPMENT, "dev").await.unwrap();
    assert_eq!(device_tags(p, &dev, DEVICE_1).await, vec!["dev", "prod"]);

    let same = store
        .tags_rename(&dev, TENANT_DEV, "prod", "prod")
        .await
        .unwrap();
    assert_eq!(same, 0);

    let err = store
        .tags_rename(&dev, TENANT_DEV, "unknown", "other")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// A rename onto a name taken in the same tenant changes nothing.
pub async fn rename_rejects_collision<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS, DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let err = store
        .tags_rename(&dev, TENANT_DEV, "production", "development")
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(
        device_tags(p, &dev, DEVICE_1).await,
        vec!["development", "production"]
    );

    let err = store
        .tag_update(&dev, OWNERS, "production")
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    store
        .tag_create(&staging, Tag::new(TenantId::new(TENANT_STAGING), "qa"))
        .await
        .unwrap();
    let updated = store
        .tags_rename(&dev, TENANT_DEV, "owners", "qa")
        .await
        .unwrap();
    assert_eq!(updated, 0);
    let renamed = store
        .tag_resolve(&dev, TagResolver::Id, OWNERS, &[])
        .await
        .unwrap();
    assert_eq!(renamed.name, "qa");
}

/// Deleting a tag pulls it from every reference in its tenant.
pub async fn delete_pulls_references<P: Provider>(p: &P) {
    p.load_fixtures(&[TAGS, DEVICES, PUBLIC_KEYS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let staging = RequestContext::for_tenant(TENANT_STAGING);

    let updated = store
        .tags_delete(&dev, TENANT_DEV, "production")
        .await
        .unwrap();
    assert_eq!(updated, 3);
    let (_, total) = store.tag_list(&dev, &[]).await.unwrap();
    assert_eq!(total, 2);
    assert!(device_tags(p, &dev, DEVICE_2).await.is_empty());
    assert_eq!(
        device_tags(p, &staging, DEVICE_STAGING).await,
        vec!["production"]
    );

    store.tag_delete(&dev, DEVELOPMENT).await.unwrap();
    assert!(device_tags(p, &dev, DEVICE_1).await.is_empty());
    assert!(key_tags(p, &dev, "fingerprint-1").await.is_empty());

    let err = store.tag_delete(&dev, DEVELOPMENT).await.unwrap_err();
    assert!(err.is_not_found());
    let err = store
        .tags_delete(&dev, TENANT_DEV, "production")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
