//! Storage engine implementations.
//!
//! | Engine | Feature | Description |
//! |--------|---------|-------------|
//! | Memory | always | Process-local maps, for tests and embedding |
//! | SQLite | `sqlite` | Embedded database, in-memory or file-based |
//!
//! Both engines share [`eval`]: the memory engine evaluates conditions with
//! it, and both apply updates through it.
//!
//! # Example
//!
//! ```no_run
//! use fleet_persistence::backends::memory::MemoryEngine;
//! # #[cfg(feature = "sqlite")]
//! use fleet_persistence::backends::sqlite::SqliteEngine;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let memory = MemoryEngine::new();
//!
//! # #[cfg(feature = "sqlite")]
//! let sqlite = SqliteEngine::open("./data/fleet.db")?;
//! # Ok(())
//! # }
//! ```

pub mod eval;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;
