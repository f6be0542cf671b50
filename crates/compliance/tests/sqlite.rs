//! Compliance suite over an in-memory SQLite database.

#![cfg(feature = "sqlite")]

use fleet_compliance::{EngineProvider, compliance_suite};
use fleet_persistence::backends::sqlite::SqliteEngine;

fn provider() -> EngineProvider<SqliteEngine> {
    EngineProvider::new(SqliteEngine::in_memory().expect("Failed to create SQLite engine"))
}

compliance_suite!(sqlite, provider());
