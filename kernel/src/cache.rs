use std::hash::Hash;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

/// Least-recently-used map with a fixed capacity.
///
/// Insertion order doubles as recency order: hits move an entry to the back
/// and eviction pops from the front. A capacity of zero disables the cache.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    entries: IndexMap<K, V, FxBuildHasher>,
    capacity: usize,
    evictions: usize,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: IndexMap::with_capacity_and_hasher(capacity.min(64), FxBuildHasher), capacity, evictions: 0 }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(index) = self.entries.get_index_of(&key) {
            self.entries.shift_remove_index(index);
        }
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
            self.evictions += 1;
        }
        self.entries.insert(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> usize {
        self.evictions
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
