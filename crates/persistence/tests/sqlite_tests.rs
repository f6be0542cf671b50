//! SQLite engine integration tests.
//!
//! These tests drive the document store over a real SQLite database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fleet_persistence::backends::sqlite::{SqliteBackendConfig, SqliteEngine};
use fleet_persistence::core::{
    DeviceAcceptable, DeviceStore, NamespaceStore, SessionStore, TagStore, TransactionStore,
};
use fleet_persistence::error::{StorageError, TransactionError};
use fleet_persistence::models::{Device, DeviceStatus, Namespace, Session, Tag, TagTarget};
use fleet_persistence::query::{
    DeviceResolver, Filter, NamespaceResolver, Order, Paginator, QueryOption, Sorter, TagResolver,
};
use fleet_persistence::store::DocumentStore;
use fleet_persistence::tenant::{CancellationToken, RequestContext, TenantId};
use tokio_test::{assert_err, assert_ok};

fn create_store() -> DocumentStore<SqliteEngine> {
    let engine = SqliteEngine::in_memory().expect("Failed to create SQLite engine");
    DocumentStore::new(engine)
}

async fn create_namespace(store: &DocumentStore<SqliteEngine>, name: &str) -> TenantId {
    store
        .namespace_create(&RequestContext::new(), Namespace::new(name, "owner"))
        .await
        .expect("Failed to create namespace")
        .tenant_id
}

// ============================================================================
// Query Tests
// ============================================================================

#[tokio::test]
async fn test_list_filters_sorts_and_paginates() {
    let store = create_store();
    let tenant = create_namespace(&store, "ns").await;
    let ctx = RequestContext::for_tenant(tenant.clone());

    for (name, mac) in [("web-1", "01"), ("web-2", "02"), ("db-1", "03"), ("web-3", "04")] {
        store
            .device_create(&ctx, Device::new(tenant.clone(), name, mac))
            .await
            .unwrap();
    }

    let (devices, total) = assert_ok!(
        store
            .device_list(
                &ctx,
                DeviceAcceptable::AsFalse,
                &[
                    QueryOption::Paginate(Paginator::new(1, 2)),
                    QueryOption::Sort(Sorter::new("name", Order::Desc)),
                    QueryOption::Match(vec![Filter::property("name", "contains", "WEB")]),
                ],
            )
            .await
    );

    assert_eq!(total, 3);
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["web-3", "web-2"]);
}

#[tokio::test]
async fn test_status_prefilter_and_counters() {
    let store = create_store();
    let tenant = create_namespace(&store, "ns").await;
    let ctx = RequestContext::for_tenant(tenant.clone());

    let device = store
        .device_create(&ctx, Device::new(tenant.clone(), "web", "01"))
        .await
        .unwrap();
    store
        .device_create(&ctx, Device::new(tenant.clone(), "db", "02"))
        .await
        .unwrap();
    store
        .device_update_status(&ctx, &device.uid, DeviceStatus::Accepted)
        .await
        .unwrap();

    let (accepted, total) = store
        .device_list(
            &ctx,
            DeviceAcceptable::FromRemoved,
            &[QueryOption::WithDeviceStatus(DeviceStatus::Accepted)],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(accepted[0].uid, device.uid);
    assert!(!accepted[0].acceptable);

    let ns = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, tenant.as_str(), &[])
        .await
        .unwrap();
    assert_eq!(ns.devices_accepted_count, 1);
    assert_eq!(ns.devices_pending_count, 1);
}

// ============================================================================
// Uniqueness Tests
// ============================================================================

#[tokio::test]
async fn test_hostname_is_unique_per_tenant() {
    let store = create_store();
    let t1 = create_namespace(&store, "one").await;
    let t2 = create_namespace(&store, "two").await;

    store
        .device_create(&RequestContext::new(), Device::new(t1.clone(), "web", "01"))
        .await
        .unwrap();
    store
        .device_create(&RequestContext::new(), Device::new(t2.clone(), "web", "01"))
        .await
        .unwrap();

    let err = store
        .device_create(&RequestContext::new(), Device::new(t1.clone(), "web", "02"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(err.conflicting_fields(), Some(&["name".to_string()][..]));
}

// ============================================================================
// Transaction Tests
// ============================================================================

#[tokio::test]
async fn test_failed_transaction_rolls_back_every_write() {
    let store = create_store();
    let ctx = RequestContext::for_tenant("t1");

    let result: Result<(), StorageError> = store
        .with_transaction(&ctx, |tx| {
            tx.tag_create(Tag::new(TenantId::new("t1"), "a"))?;
            tx.tag_create(Tag::new(TenantId::new("t1"), "b"))?;
            Err(TransactionError::InvalidState.into())
        })
        .await;
    assert!(matches!(
        result,
        Err(StorageError::Transaction(TransactionError::InvalidState))
    ));

    let (tags, total) = store.tag_list(&ctx, &[]).await.unwrap();
    assert!(tags.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_transaction_commits_across_entities() {
    let store = create_store();
    let tenant = create_namespace(&store, "ns").await;
    let ctx = RequestContext::for_tenant(tenant.clone());

    let uid = store
        .with_transaction(&ctx, {
            let tenant = tenant.clone();
            move |tx| {
                let tag = tx.tag_create(Tag::new(tenant.clone(), "prod"))?;
                let device = tx.device_create(Device::new(tenant, "web", "01"))?;
                tx.tag_push_to_target(&tag.id, TagTarget::Device, &device.uid)?;
                Ok(device.uid)
            }
        })
        .await
        .unwrap();

    let device = store
        .device_resolve(&ctx, DeviceResolver::Uid, &uid, &[])
        .await
        .unwrap();
    assert_eq!(device.tags, vec!["prod"]);
    store
        .tag_resolve(&ctx, TagResolver::Name, "prod", &[])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_locked_database_fails_to_start_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let config = SqliteBackendConfig {
        busy_timeout_ms: 0,
        ..Default::default()
    };
    let store = DocumentStore::new(SqliteEngine::with_config(&path, config).unwrap());

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let ran = AtomicBool::new(false);
    let ctx = RequestContext::for_tenant("t1");
    let result = store
        .with_transaction(&ctx, |tx| {
            ran.store(true, Ordering::SeqCst);
            tx.tag_create(Tag::new(TenantId::new("t1"), "a"))
        })
        .await;
    assert!(
        matches!(
            result,
            Err(StorageError::Transaction(TransactionError::StartFailed { .. }))
        ),
        "{result:?}"
    );
    assert!(!ran.load(Ordering::SeqCst));

    holder.execute_batch("ROLLBACK").unwrap();
    assert_ok!(
        store
            .with_transaction(&ctx, |tx| tx.tag_create(Tag::new(TenantId::new("t1"), "a")))
            .await
    );
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancelled_context_fails_fast() {
    let store = create_store();
    let token = CancellationToken::new();
    let ctx = RequestContext::new().with_cancellation(token.clone());
    token.cancel();

    let err = assert_err!(store.session_list(&ctx, &[]).await);
    assert!(matches!(err, StorageError::Cancelled));
}

#[tokio::test]
async fn test_expired_deadline_fails_fast() {
    let store = create_store();
    let ctx = RequestContext::new().with_timeout(Duration::ZERO);
    let err = assert_err!(
        store
            .session_create(&ctx, Session::new("s1", TenantId::new("t1"), "d1", "root"))
            .await
    );
    assert!(matches!(err, StorageError::Cancelled));
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.db");

    let tenant = {
        let store = DocumentStore::new(SqliteEngine::open(&path).unwrap());
        create_namespace(&store, "persisted").await
    };

    let store = DocumentStore::new(SqliteEngine::open(&path).unwrap());
    let ns = store
        .namespace_resolve(
            &RequestContext::new(),
            NamespaceResolver::Name,
            "PERSISTED",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(ns.tenant_id, tenant);
}
