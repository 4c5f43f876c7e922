//! In-memory append-only archive.

use crate::application::ports::{ArchiveInsert, ArchiveStore, StoreError};
use crate::domain::archive::ArchiveRecord;
use crate::domain::scope::{DocumentNumber, ScopeKey};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Archive kept in process memory.
///
/// Uniqueness of `(scope, number)` is enforced by inserting through the
/// map's vacant entry, which holds the shard lock for the check and the
/// write together.
#[derive(Debug)]
pub struct InMemoryArchiveStore {
    records: DashMap<(ScopeKey, DocumentNumber), ArchiveRecord, RandomState>,
}

impl InMemoryArchiveStore {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self {
            records: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Number of archived numbers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing has been archived.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records of one scope, ordered by number.
    pub fn records_for(&self, scope: &ScopeKey) -> Vec<ArchiveRecord> {
        let mut records: Vec<ArchiveRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == *scope)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(ArchiveRecord::number);
        records
    }
}

impl Default for InMemoryArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn insert_new(&self, record: ArchiveRecord) -> Result<ArchiveInsert, StoreError> {
        let key = (record.scope().clone(), record.number());
        match self.records.entry(key) {
            Entry::Occupied(existing) => Ok(ArchiveInsert::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(ArchiveInsert::Inserted)
            }
        }
    }

    fn get(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
    ) -> Result<Option<ArchiveRecord>, StoreError> {
        Ok(self
            .records
            .get(&(scope.clone(), number))
            .map(|entry| entry.value().clone()))
    }
}
