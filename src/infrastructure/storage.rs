//! Sharded lock table.
//!
//! Every key owns its own mutex. The `DashMap` shard lock is held only while
//! the key's slot is looked up or created; the per-key mutex is held for the
//! caller's critical section and acquired with a bounded wait.

use crate::application::ports::{Storage, StoreError};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on waiting for a per-key lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Slot<V> {
    /// Set under the slot lock right before the slot leaves the map.
    retired: bool,
    value: V,
}

type SharedSlot<V> = Arc<Mutex<Slot<V>>>;

/// Thread-safe lock table backed by DashMap.
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, SharedSlot<V>, RandomState>,
    lock_timeout: Duration,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a lock table with the default lock timeout.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a lock table that waits at most `lock_timeout` for a key.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
            lock_timeout,
        }
    }

    /// The bounded wait applied to per-key locks.
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    fn slot(&self, key: K, factory: &impl Fn() -> V) -> SharedSlot<V> {
        // the map guard drops at the end of this statement
        self.map
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    retired: false,
                    value: factory(),
                }))
            })
            .value()
            .clone()
    }

    /// Run `accessor` on the value of `key`, creating it with `factory` if
    /// needed, while holding the key's lock.
    pub fn update<F, R>(
        &self,
        key: K,
        factory: impl Fn() -> V,
        accessor: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut V) -> R,
    {
        loop {
            let slot = self.slot(key.clone(), &factory);
            let Some(mut guard) = slot.try_lock_for(self.lock_timeout) else {
                return Err(StoreError::Timeout {
                    waited: self.lock_timeout,
                });
            };
            if guard.retired {
                // swept between lookup and lock; look the key up again
                continue;
            }
            return Ok(accessor(&mut guard.value));
        }
    }

    /// Run `reader` on the value of `key` without creating it.
    pub fn read<F, R>(&self, key: &K, reader: F) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&V) -> R,
    {
        let Some(slot) = self.map.get(key).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        let Some(guard) = slot.try_lock_for(self.lock_timeout) else {
            return Err(StoreError::Timeout {
                waited: self.lock_timeout,
            });
        };
        if guard.retired {
            return Ok(None);
        }
        Ok(Some(reader(&guard.value)))
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Remove every entry, waiting for in-flight accesses to finish.
    pub fn clear(&self) {
        self.map.retain(|_, slot| {
            slot.lock().retired = true;
            false
        });
    }

    /// Remove entries for which `f` returns false.
    ///
    /// Entries whose lock is currently held are kept.
    pub fn retain(&self, mut f: impl FnMut(&K, &mut V) -> bool) {
        self.map.retain(|key, slot| match slot.try_lock() {
            Some(mut guard) => {
                let keep = f(key, &mut guard.value);
                if !keep {
                    guard.retired = true;
                }
                keep
            }
            None => true,
        });
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedStorage")
            .field("entries", &self.map.len())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

// Implement the Storage port
impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn with_entry_mut<F, R>(
        &self,
        key: K,
        factory: impl Fn() -> V,
        accessor: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut V) -> R,
    {
        self.update(key, factory, accessor)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        ShardedStorage::clear(self)
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        ShardedStorage::retain(self, f)
    }
}

// Implement Storage for Arc<ShardedStorage> to allow it to be shared
impl<K, V> Storage<K, V> for Arc<ShardedStorage<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn with_entry_mut<F, R>(
        &self,
        key: K,
        factory: impl Fn() -> V,
        accessor: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut V) -> R,
    {
        (**self).update(key, factory, accessor)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        (**self).retain(f)
    }
}
