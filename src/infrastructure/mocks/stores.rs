//! Store doubles that fail on demand.

use crate::application::ports::{ArchiveInsert, ArchiveStore, CounterStore, StoreError};
use crate::domain::archive::ArchiveRecord;
use crate::domain::scope::{DocumentNumber, ScopeKey};
use crate::infrastructure::archive_store::InMemoryArchiveStore;
use crate::infrastructure::counter::InMemoryCounterStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counter store that fails the next `n` calls to `next` with a chosen error,
/// then behaves like [`InMemoryCounterStore`].
#[derive(Debug)]
pub struct FlakyCounterStore {
    inner: InMemoryCounterStore,
    failures_left: AtomicUsize,
    error: StoreError,
}

impl FlakyCounterStore {
    /// Fail the next `failures` allocations with `error`.
    pub fn new(failures: usize, error: StoreError) -> Self {
        Self {
            inner: InMemoryCounterStore::new(),
            failures_left: AtomicUsize::new(failures),
            error,
        }
    }

    /// Fail the next `failures` allocations as if the backend were down.
    pub fn unavailable(failures: usize) -> Self {
        Self::new(
            failures,
            StoreError::Unavailable {
                reason: "injected failure".to_string(),
            },
        )
    }

    fn injected(&self) -> Option<StoreError> {
        self.failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .ok()
            .map(|_| self.error.clone())
    }
}

impl CounterStore for FlakyCounterStore {
    fn next(&self, scope: &ScopeKey, start: u64) -> Result<u64, StoreError> {
        match self.injected() {
            Some(error) => Err(error),
            None => self.inner.next(scope, start),
        }
    }

    fn last_issued(&self, scope: &ScopeKey) -> Result<Option<u64>, StoreError> {
        self.inner.last_issued(scope)
    }
}

/// Archive store whose writes fail while `failing` is set.
#[derive(Debug, Default)]
pub struct FailingArchiveStore {
    inner: InMemoryArchiveStore,
    failing: AtomicBool,
}

impl FailingArchiveStore {
    /// Create a store that starts out failing.
    pub fn new() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    /// Switch write failures on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl ArchiveStore for FailingArchiveStore {
    fn insert_new(&self, record: ArchiveRecord) -> Result<ArchiveInsert, StoreError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable {
                reason: "injected failure".to_string(),
            });
        }
        self.inner.insert_new(record)
    }

    fn get(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
    ) -> Result<Option<ArchiveRecord>, StoreError> {
        self.inner.get(scope, number)
    }
}
