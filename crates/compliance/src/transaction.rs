//! Transaction scope cases.

use std::time::Duration;

use fleet_persistence::StorageError;
use fleet_persistence::core::{DeviceStore, SessionStore, TagStore, TransactionStore};
use fleet_persistence::error::TransactionError;
use fleet_persistence::models::{Device, DeviceStatus, Session, Tag, TagTarget};
use fleet_persistence::query::DeviceResolver;
use fleet_persistence::tenant::{CancellationToken, RequestContext, TenantId};

use crate::device::{DEVICE_3, DEVICE_4, namespace_counts};
use crate::fixtures::{DEVICES, NAMESPACES};
use crate::{Provider, TENANT_DEV};

/// A failing body leaves no trace, counters included.
pub async fn rollback_discards_writes<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let before = namespace_counts(p, TENANT_DEV).await;

    let result: Result<(), StorageError> = store
        .with_transaction(&dev, |tx| {
            tx.tag_create(Tag::new(TenantId::new(TENANT_DEV), "qa"))?;
            tx.device_update_status(DEVICE_3, DeviceStatus::Accepted)?;
            tx.device_delete(DEVICE_4)?;
            Err(TransactionError::InvalidState.into())
        })
        .await;
    assert!(matches!(
        result,
        Err(StorageError::Transaction(TransactionError::InvalidState))
    ));

    let (_, tags) = store.tag_list(&dev, &[]).await.unwrap();
    assert_eq!(tags, 0);
    let device = store
        .device_resolve(&dev, DeviceResolver::Uid, DEVICE_3, &[])
        .await
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Pending);
    store
        .device_resolve(&dev, DeviceResolver::Uid, DEVICE_4, &[])
        .await
        .unwrap();
    assert_eq!(namespace_counts(p, TENANT_DEV).await, before);

    let err = store
        .with_transaction(&dev, |tx| {
            tx.tag_create(Tag::new(TenantId::new(TENANT_DEV), "qa"))?;
            tx.tag_create(Tag::new(TenantId::new(TENANT_DEV), "qa"))?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    let (_, tags) = store.tag_list(&dev, &[]).await.unwrap();
    assert_eq!(tags, 0);
}

/// A successful body commits writes to several collections at once.
pub async fn commit_spans_collections<P: Provider>(p: &P) {
    p.load_fixtures(&[NAMESPACES, DEVICES]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let [pending, accepted, rejected, removed] = namespace_counts(p, TENANT_DEV).await;

    let uid = store
        .with_transaction(&dev, |tx| {
            let tag = tx.tag_create(Tag::new(TenantId::new(TENANT_DEV), "ops"))?;
            let device = tx.device_create(Device::new(TenantId::new(TENANT_DEV), "device-5", "mac-5"))?;
            tx.tag_push_to_target(&tag.id, TagTarget::Device, &device.uid)?;
            tx.session_create(Session::new(
                "tx-session",
                TenantId::new(TENANT_DEV),
                device.uid.as_str(),
                "root",
            ))?;
            Ok(device.uid)
        })
        .await
        .unwrap();

    let device = store
        .device_resolve(&dev, DeviceResolver::Uid, &uid, &[])
        .await
        .unwrap();
    assert_eq!(device.tags, vec!["ops"]);
    assert_eq!(device.status, DeviceStatus::Pending);
    store.active_session_resolve(&dev, "tx-session").await.unwrap();
    assert_eq!(
        namespace_counts(p, TENANT_DEV).await,
        [pending + 1, accepted, rejected, removed]
    );
}

/// Cancelled or expired contexts fail before the body runs.
pub async fn cancelled_context_is_rejected<P: Provider>(p: &P) {
    let store = p.store();
    let token = CancellationToken::new();
    let cancelled = RequestContext::for_tenant(TENANT_DEV).with_cancellation(token.clone());
    token.cancel();

    let err = store
        .with_transaction(&cancelled, |tx| {
            tx.tag_create(Tag::new(TenantId::new(TENANT_DEV), "late"))?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Cancelled));
    let err = store.tag_list(&cancelled, &[]).await.unwrap_err();
    assert!(matches!(err, StorageError::Cancelled));

    let expired = RequestContext::for_tenant(TENANT_DEV).with_timeout(Duration::ZERO);
    let err = store.tag_list(&expired, &[]).await.unwrap_err();
    assert!(matches!(err, StorageError::Cancelled));

    let live = RequestContext::for_tenant(TENANT_DEV);
    let (_, total) = store.tag_list(&live, &[]).await.unwrap();
    assert_eq!(total, 0);
}
