use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

const DEFAULT_SHARDS: usize = 64;

pub(crate) type Slot<V> = Arc<Mutex<V>>;

thread_local! {
    static HELD_ACCESSORS: Cell<usize> = const { Cell::new(0) };
}

/// A concurrent `String -> V` map split into independently locked shards.
///
/// Shard locks are only held for the duration of a lookup, insertion or removal. Every value
/// lives behind its own mutex, which is what an [`Accessor`] locks.
///
/// # Lock Discipline
///
/// A thread holds at most one accessor at a time. Code that needs a child and then its parent
/// reads what it needs from the child, drops the child's accessor (see
/// [`Accessor::release_then`]) and only then locks the parent. Debug builds assert this on every
/// acquisition, so a violation fails fast instead of deadlocking.
pub struct ShardedMap<V> {
    shards: Box<[RwLock<HashMap<String, Slot<V>>>]>,
    hasher: RandomState,
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl<V> ShardedMap<V> {
    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Slot<V>>> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Inserts `value` under `key` unless the key is already present.
    ///
    /// Returns `true` if the value was inserted.
    pub fn insert_if_absent(&self, key: String, value: V) -> bool {
        let mut shard = self.shard(&key).write();
        if shard.contains_key(&key) {
            return false;
        }
        shard.insert(key, Arc::new(Mutex::new(value)));
        true
    }

    /// Locks the value stored under `key` exclusively.
    pub fn find(&self, key: &str) -> Option<Accessor<V>> {
        let slot = self.shard(key).read().get(key).cloned()?;
        Some(Accessor::lock(slot))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Removes `key` from the map. Returns `false` if it was not present.
    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    pub fn keys(&self) -> Vec<String> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Clones out every slot so that values can be visited without holding any shard lock.
    pub(crate) fn slots(&self) -> Vec<Slot<V>> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }
}

/// Exclusive, RAII-scoped access to one value of a [`ShardedMap`].
pub struct Accessor<V> {
    guard: ArcMutexGuard<RawMutex, V>,
}

impl<V> Accessor<V> {
    pub(crate) fn lock(slot: Slot<V>) -> Self {
        HELD_ACCESSORS.with(|held| {
            debug_assert_eq!(
                held.get(),
                0,
                "a thread must release its accessor before acquiring another"
            );
            held.set(held.get() + 1);
        });
        Self {
            guard: slot.lock_arc(),
        }
    }

    /// Releases this accessor and then locks `key` in `map`.
    ///
    /// This is the only sanctioned way to move from a child to its parent.
    pub fn release_then(self, map: &ShardedMap<V>, key: &str) -> Option<Accessor<V>> {
        drop(self);
        map.find(key)
    }
}

impl<V> Drop for Accessor<V> {
    fn drop(&mut self) {
        HELD_ACCESSORS.with(|held| held.set(held.get().saturating_sub(1)));
    }
}

impl<V> Deref for Accessor<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.guard
    }
}

impl<V> DerefMut for Accessor<V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.guard
    }
}
