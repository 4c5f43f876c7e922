//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::archive::ArchiveRecord;
use crate::domain::scope::{DocumentNumber, ScopeKey};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Failure reported by a storage adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backend unreachable or refused the operation
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Backend-specific description
        reason: String,
    },
    /// Bounded wait for a lock or a backend reply ran out
    #[error("storage operation timed out after {waited:?}")]
    Timeout {
        /// How long the operation waited
        waited: Duration,
    },
    /// A counter cannot advance without wrapping
    #[error("counter overflow")]
    Overflow,
    /// Stored bytes could not be decoded
    #[error("stored data is corrupted: {reason}")]
    Corrupted {
        /// Decoder message
        reason: String,
    },
}

impl StoreError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Timeout { .. })
    }
}

/// Port for obtaining current time.
///
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Monotonic instant, used for rate windows and timeouts.
    fn now(&self) -> Instant;

    /// Wall-clock time, used to stamp archive records.
    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Port for per-key serialized state.
///
/// Every call to [`with_entry_mut`](Storage::with_entry_mut) for one key is
/// serialized against other calls for the same key. Calls for different keys
/// do not wait on each other.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an entry with exclusive mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Function that gets exclusive access to the value
    ///
    /// # Errors
    /// Returns `StoreError::Timeout` if the key stays locked longer than the
    /// adapter's bounded wait. The accessor is not called in that case.
    fn with_entry_mut<F, R>(
        &self,
        key: K,
        factory: impl Fn() -> V,
        accessor: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut V) -> R;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Remove entries for which the predicate returns false.
    ///
    /// Entries that are locked by an in-flight access are kept.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Port for the per-scope number counters.
///
/// Implementations must make [`next`](CounterStore::next) atomic per scope:
/// no two calls for one scope may return the same value, and values for a
/// scope strictly increase.
pub trait CounterStore: Send + Sync + Debug {
    /// Advance the counter of `scope` and return the newly issued value.
    ///
    /// An unseen scope is created on the fly and issues `start` first.
    ///
    /// # Errors
    /// `StoreError::Overflow` when the counter cannot advance; transient
    /// errors when the backend is unreachable or too slow.
    fn next(&self, scope: &ScopeKey, start: u64) -> Result<u64, StoreError>;

    /// The last value issued for `scope`, or `None` for an unseen scope.
    fn last_issued(&self, scope: &ScopeKey) -> Result<Option<u64>, StoreError>;
}

impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    fn next(&self, scope: &ScopeKey, start: u64) -> Result<u64, StoreError> {
        (**self).next(scope, start)
    }

    fn last_issued(&self, scope: &ScopeKey) -> Result<Option<u64>, StoreError> {
        (**self).last_issued(scope)
    }
}

/// Result of an insert into the append-only archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveInsert {
    /// The record was written
    Inserted,
    /// A record for the same number already exists and was left untouched
    Existing(ArchiveRecord),
}

/// Port for the append-only archive.
///
/// Records are never updated or removed once inserted.
pub trait ArchiveStore: Send + Sync + Debug {
    /// Write `record` unless a record for its `(scope, number)` exists.
    fn insert_new(&self, record: ArchiveRecord) -> Result<ArchiveInsert, StoreError>;

    /// Look up the record for a number.
    fn get(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
    ) -> Result<Option<ArchiveRecord>, StoreError>;
}

impl<T: ArchiveStore + ?Sized> ArchiveStore for Arc<T> {
    fn insert_new(&self, record: ArchiveRecord) -> Result<ArchiveInsert, StoreError> {
        (**self).insert_new(record)
    }

    fn get(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
    ) -> Result<Option<ArchiveRecord>, StoreError> {
        (**self).get(scope, number)
    }
}
