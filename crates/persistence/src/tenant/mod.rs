//! Tenant scoping for store operations.
//!
//! - [`TenantId`] - Opaque namespace identifier
//! - [`RequestContext`] - Per-call context carrying the tenant scope and cancellation
//!
//! A context scoped to a tenant narrows every read and write on tenant-owned
//! collections (devices, sessions, tags, keys, tunnels) to that tenant. A
//! document that exists under another tenant behaves exactly like a missing one.
//!
//! ```
//! use fleet_persistence::tenant::{RequestContext, TenantId};
//!
//! let admin = RequestContext::new();
//! let scoped = RequestContext::for_tenant(TenantId::new("acme"));
//!
//! assert!(admin.tenant().is_none());
//! assert_eq!(scoped.tenant().unwrap().as_str(), "acme");
//! ```

mod context;
mod id;

pub use context::{CancellationToken, Interrupt, RequestContext};
pub use id::TenantId;
