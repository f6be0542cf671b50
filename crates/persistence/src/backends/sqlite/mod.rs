//! SQLite engine.
//!
//! Every collection lives in one `documents` table as JSON text, tagged with
//! its collection name. Conditions compile to SQL over SQLite's JSON
//! functions; unique constraints are partial expression indexes, one per
//! [`UniqueIndex`](crate::core::UniqueIndex).
//!
//! # Example
//!
//! ```no_run
//! use fleet_persistence::backends::sqlite::SqliteEngine;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Schema migrations run on open
//! let engine = SqliteEngine::open("fleet.db")?;
//! assert!(!engine.is_memory());
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     collection TEXT NOT NULL,
//!     data TEXT NOT NULL
//! );
//! ```

mod backend;
mod executor;
pub mod schema;
mod sql;

pub use backend::{SqliteBackendConfig, SqliteEngine};
