//! Backend-agnostic compliance suite for fleet persistence engines.
//!
//! Every case in this crate is generic over a [`Provider`]: something that
//! hands out a store, loads named fixtures and wipes state between cases.
//! A storage engine is conformant when the whole suite passes against it
//! unmodified. Cases never look at which engine they run on.
//!
//! # Running the suite
//!
//! ```ignore
//! use fleet_compliance::{EngineProvider, compliance_suite};
//! use fleet_persistence::backends::memory::MemoryEngine;
//!
//! compliance_suite!(memory, EngineProvider::new(MemoryEngine::new()));
//! ```
//!
//! The macro expands to one `#[tokio::test]` per case, named
//! `<prefix>_<family>_<case>`.

#![warn(missing_docs)]

use async_trait::async_trait;
use fleet_persistence::core::{Engine, MaintenanceStore, Store};
use fleet_persistence::error::StorageResult;
use fleet_persistence::fixtures::Fixture;
use fleet_persistence::store::DocumentStore;
use fleet_persistence::tenant::RequestContext;

pub mod device;
pub mod fixtures;
pub mod key;
pub mod namespace;
pub mod query;
pub mod session;
pub mod tag;
pub mod tenant;
pub mod transaction;
pub mod user;

#[doc(hidden)]
pub use paste;

/// Tenant of the `dev` fixture namespace.
pub const TENANT_DEV: &str = "00000000-0000-4000-0000-000000000000";

/// Tenant of the `staging` fixture namespace.
pub const TENANT_STAGING: &str = "00000000-0000-4001-0000-000000000000";

/// Owner of `dev`.
pub const USER_JOHN: &str = "507f1f77bcf86cd799439011";

/// Owner of `staging`, observer in `dev`.
pub const USER_JANE: &str = "608f32a2c7351f001f6475e0";

/// Pending administrator in `staging`.
pub const USER_BOB: &str = "709f45b5e812c1002f3a67e7";

/// Member of nothing; has invitations to `dev`.
pub const USER_ALEX: &str = "80fdcea1d7299c002f3a67e8";

/// What the suite needs from an engine under test.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The store under test.
    type Store: Store;

    /// Returns the store.
    fn store(&self) -> &Self::Store;

    /// Loads the named fixtures, in order.
    async fn load_fixtures(&self, names: &[&str]) -> StorageResult<()>;

    /// Removes all data.
    async fn reset(&self) -> StorageResult<()>;

    /// Releases whatever the provider holds.
    fn release(self);
}

/// A provider over a [`DocumentStore`] for any engine.
#[derive(Debug)]
pub struct EngineProvider<E: Engine> {
    store: DocumentStore<E>,
}

impl<E: Engine> EngineProvider<E> {
    /// Wraps an engine.
    pub fn new(engine: E) -> Self {
        Self::with_store(DocumentStore::new(engine))
    }

    /// Wraps an already configured store.
    pub fn with_store(store: DocumentStore<E>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<E: Engine> Provider for EngineProvider<E> {
    type Store = DocumentStore<E>;

    fn store(&self) -> &Self::Store {
        &self.store
    }

    async fn load_fixtures(&self, names: &[&str]) -> StorageResult<()> {
        let fixtures = names
            .iter()
            .map(|name| fixtures::load(name))
            .collect::<StorageResult<Vec<Fixture>>>()?;
        self.store
            .load_fixtures(&RequestContext::new(), &fixtures)
            .await
    }

    async fn reset(&self) -> StorageResult<()> {
        self.store.wipe(&RequestContext::new()).await
    }

    fn release(self) {
        tracing::debug!(engine = %self.store.engine().kind(), "Releasing compliance provider");
    }
}

/// Expands to one `#[tokio::test]` per compliance case.
///
/// `$provider` is evaluated once per test and must produce a [`Provider`].
#[macro_export]
macro_rules! compliance_suite {
    ($prefix:ident, $provider:expr) => {
        $crate::compliance_suite!(@cases $prefix, $provider;
            namespace::list_with_filters_and_members_data,
            namespace::resolve_by_tenant_and_name,
            namespace::get_preferred_falls_back_to_first_membership,
            namespace::create_normalizes_and_adds_owner,
            namespace::create_rejects_duplicates,
            namespace::conflicts,
            namespace::update,
            namespace::increment_device_count_never_goes_negative,
            namespace::sync_device_counts,
            namespace::delete_cascades,
            namespace::membership_lifecycle,
            namespace::invitations_resolve_latest,
            device::list_with_status_and_acceptable,
            device::list_is_tenant_scoped,
            device::resolve_by_keys,
            device::create_derives_uid_and_counts,
            device::conflicts,
            device::update_and_heartbeat,
            device::update_status_moves_counters,
            device::delete_cascades_sessions,
            device::delete_many_ignores_unknown,
            device::migrate_uid,
            session::list_with_enrichments,
            session::resolve_missing,
            session::update_closes_active_record,
            session::events_track_types_and_seats,
            session::delete_before,
            user::list_and_resolve,
            user::create_normalizes_and_rejects_duplicates,
            user::create_invited,
            user::conflicts,
            user::update,
            user::get_info,
            user::delete_drops_memberships,
            tag::list_and_resolve,
            tag::create_rejects_duplicates,
            tag::push_and_pull,
            tag::pull_from_every_target,
            tag::rename_touches_every_target,
            tag::rename_rejects_collision,
            tag::delete_pulls_references,
            key::api_key_lifecycle,
            key::public_key_lifecycle,
            key::private_keys,
            key::system_and_tunnels,
            query::pagination_counts_every_match,
            query::filters_combine_with_operators,
            query::invalid_filters_are_rejected,
            query::sort_orders,
            transaction::rollback_discards_writes,
            transaction::commit_spans_collections,
            transaction::cancelled_context_is_rejected,
            tenant::creates_stay_in_context_tenant,
        );
    };
    (@cases $prefix:ident, $provider:expr; $($family:ident :: $case:ident),+ $(,)?) => {
        $(
            $crate::paste::paste! {
                #[tokio::test]
                async fn [<$prefix _ $family _ $case>]() {
                    let provider = $provider;
                    $crate::Provider::reset(&provider)
                        .await
                        .expect("failed to reset provider");
                    $crate::$family::$case(&provider).await;
                    $crate::Provider::release(provider);
                }
            }
        )+
    };
}
