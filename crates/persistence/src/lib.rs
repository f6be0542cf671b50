//! Device Fleet Persistence Layer
//!
//! This crate stores the state of a multi-tenant device fleet platform:
//! namespaces (tenants) and their members, enrolled devices, remote sessions
//! and their events, users, tags, API keys, SSH keys and tunnels. Every
//! entity is a JSON document in a named collection; storage engines execute
//! backend-neutral query stages against those collections.
//!
//! # Features
//!
//! - **Filter compiler**: declarative property/operator filter lists compiled
//!   into engine-neutral [`Stage`](query::Stage)s
//! - **Composable query options**: namespace scope, device status, filters,
//!   sort, pagination and enrichments applied in a fixed phase order
//! - **Tenant scoping**: a [`RequestContext`] bound to a tenant narrows every
//!   read and write on tenant-owned collections
//! - **Uniqueness**: declared unique indexes enforced by every engine, plus
//!   sparse-probe conflict detection
//! - **Transactions**: multi-document operations commit or roll back together
//!
//! Available engine features:
//! - in-memory engine (always available)
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant ids and the per-call request context
//! - [`query`] - Filters, compilers, query options, resolvers and conflict probes
//! - [`models`] - Entity models and their document mapping
//! - [`core`] - Engine traits, collections, updates and store capability traits
//! - [`backends`] - Engine implementations
//! - [`store`] - The document store implementing every capability
//! - [`counter`] - Fleet-wide counter collaborator
//! - [`fixtures`] - Named document fixtures for tests and tooling
//! - [`config`] - Engine selection from configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use fleet_persistence::backends::memory::MemoryEngine;
//! use fleet_persistence::core::{DeviceAcceptable, DeviceStore, NamespaceStore};
//! use fleet_persistence::models::{Device, Namespace};
//! use fleet_persistence::query::{Filter, QueryOption};
//! use fleet_persistence::store::DocumentStore;
//! use fleet_persistence::tenant::RequestContext;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = DocumentStore::new(MemoryEngine::new());
//! let ns = store
//!     .namespace_create(&RequestContext::new(), Namespace::new("acme", "owner-id"))
//!     .await?;
//!
//! let ctx = RequestContext::for_tenant(ns.tenant_id.clone());
//! store
//!     .device_create(&ctx, Device::new(ns.tenant_id.clone(), "web-1", "aa:bb:cc:dd:ee:ff"))
//!     .await?;
//!
//! let (devices, total) = store
//!     .device_list(
//!         &ctx,
//!         DeviceAcceptable::IfNotAccepted,
//!         &[QueryOption::Match(vec![Filter::property("name", "contains", "WEB")])],
//!     )
//!     .await?;
//! assert_eq!(total, 1);
//! assert!(devices[0].acceptable);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod counter;
pub mod error;
pub mod fixtures;
pub mod models;
pub mod query;
pub mod store;
pub mod tenant;

// Re-export commonly used types at crate root
pub use error::{StorageError, StorageResult};
pub use tenant::{RequestContext, TenantId};

// Re-export core traits
pub use core::{BackendKind, Engine, Executor, Store};

pub use config::{AnyEngine, EngineConfig};
pub use store::{DocumentStore, StoreBuilder, StoreHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
