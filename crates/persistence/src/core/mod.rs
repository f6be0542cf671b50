//! Core storage abstractions.
//!
//! - [`Collection`] / [`UniqueIndex`] - the document collections and their uniqueness rules
//! - [`Engine`] / [`Executor`] - the storage engine boundary
//! - [`Update`] - field-level document mutations
//! - Store capability traits - one per entity family, composed into [`Store`]
//!
//! # Trait Hierarchy
//!
//! ```text
//! Store
//!     ├── NamespaceStore
//!     ├── MemberStore
//!     ├── MembershipInvitationStore
//!     ├── DeviceStore
//!     ├── SessionStore
//!     ├── UserStore
//!     ├── TagStore
//!     ├── ApiKeyStore
//!     ├── PublicKeyStore
//!     ├── PrivateKeyStore
//!     ├── SystemStore
//!     ├── TunnelStore
//!     └── TransactionStore
//! ```
//!
//! A backend only needs to implement the capabilities it offers; [`Store`] is
//! implemented automatically for types offering all of them.

mod backend;
mod collection;
mod store;
mod update;

pub use backend::{BackendKind, Engine, Executor};
pub use collection::{Collection, UniqueIndex};
pub use store::{
    ApiKeyStore, DeviceAcceptable, DeviceStore, MaintenanceStore, MemberStore,
    MembershipInvitationStore, NamespaceStore, PrivateKeyStore, PublicKeyStore, SessionStore,
    Store, SystemStore, TagStore, TransactionStore, TunnelStore, UserStore,
};
pub use update::{Update, UpdateOp, UpdateResult};
