//! Fleet-wide counter collaborator.
//!
//! Device counters shared across the fleet are only ever moved through
//! atomic increments and decrements. The store reports the deltas of a
//! committed operation to a [`CounterCache`]; it never reads a counter back
//! to compute a new value.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageResult;

/// Atomic, non-negative counters keyed by `(scope, key)`.
#[async_trait]
pub trait CounterCache: Debug + Send + Sync {
    /// Adds `n` to a counter.
    async fn increase_counter(&self, scope: &str, key: &str, n: u64) -> StorageResult<()>;

    /// Subtracts `n` from a counter, stopping at zero.
    async fn decrease_counter(&self, scope: &str, key: &str, n: u64) -> StorageResult<()>;

    /// Current value; zero when never set.
    async fn counter(&self, scope: &str, key: &str) -> StorageResult<u64>;
}

/// In-process [`CounterCache`].
#[derive(Debug, Default)]
pub struct MemoryCounterCache {
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl MemoryCounterCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterCache for MemoryCounterCache {
    async fn increase_counter(&self, scope: &str, key: &str, n: u64) -> StorageResult<()> {
        let mut counters = self.counters.lock().await;
        let value = counters
            .entry((scope.to_string(), key.to_string()))
            .or_default();
        *value = value.saturating_add(n);
        Ok(())
    }

    async fn decrease_counter(&self, scope: &str, key: &str, n: u64) -> StorageResult<()> {
        let mut counters = self.counters.lock().await;
        if let Some(value) = counters.get_mut(&(scope.to_string(), key.to_string())) {
            *value = value.saturating_sub(n);
        }
        Ok(())
    }

    async fn counter(&self, scope: &str, key: &str) -> StorageResult<u64> {
        Ok(self
            .counters
            .lock()
            .await
            .get(&(scope.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decrease_saturates_at_zero() {
        let cache = MemoryCounterCache::new();
        cache.decrease_counter("t", "devices", 3).await.unwrap();
        assert_eq!(cache.counter("t", "devices").await.unwrap(), 0);

        cache.increase_counter("t", "devices", 2).await.unwrap();
        cache.decrease_counter("t", "devices", 5).await.unwrap();
        assert_eq!(cache.counter("t", "devices").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counters_are_independent() {
        let cache = MemoryCounterCache::new();
        cache.increase_counter("t1", "accepted", 2).await.unwrap();
        cache.increase_counter("t2", "accepted", 5).await.unwrap();
        cache.decrease_counter("t2", "accepted", 1).await.unwrap();
        assert_eq!(cache.counter("t1", "accepted").await.unwrap(), 2);
        assert_eq!(cache.counter("t2", "accepted").await.unwrap(), 4);
    }
}
