//! In-memory engine.
//!
//! Keeps every collection in a process-local map. Useful for tests and for
//! embedding the store without a database; nothing survives a restart.

mod backend;

pub use backend::MemoryEngine;
