//! In-memory counter store.
//!
//! Each scope's counter lives in its own slot of a [`ShardedStorage`] lock
//! table, so allocations for one scope are serialized while other scopes
//! proceed independently.

use crate::application::ports::{CounterStore, StoreError};
use crate::domain::scope::ScopeKey;
use crate::infrastructure::storage::ShardedStorage;
use std::time::Duration;

/// Counter store that keeps per-scope counters in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: ShardedStorage<ScopeKey, Option<u64>>,
}

impl InMemoryCounterStore {
    /// Create an empty store with the default lock timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that waits at most `lock_timeout` for a scope.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            counters: ShardedStorage::with_lock_timeout(lock_timeout),
        }
    }

    /// Number of scopes seen so far.
    pub fn scope_count(&self) -> usize {
        self.counters.len()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn next(&self, scope: &ScopeKey, start: u64) -> Result<u64, StoreError> {
        self.counters.update(
            scope.clone(),
            || None,
            |last| -> Result<u64, StoreError> {
                let issued = match *last {
                    None => start,
                    Some(value) => value.checked_add(1).ok_or(StoreError::Overflow)?,
                };
                *last = Some(issued);
                Ok(issued)
            },
        )?
    }

    fn last_issued(&self, scope: &ScopeKey) -> Result<Option<u64>, StoreError> {
        Ok(self.counters.read(scope, |last| *last)?.flatten())
    }
}
