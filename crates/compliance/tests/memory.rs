//! Compliance suite over the in-memory engine.

use fleet_compliance::{EngineProvider, compliance_suite};
use fleet_persistence::backends::memory::MemoryEngine;

compliance_suite!(memory, EngineProvider::new(MemoryEngine::new()));
