//! Sharded Map Implementation
//!
//! Concurrent string-keyed hashmap used by [`MemoryLayer`](super::MemoryLayer).
//!
//! # Design
//!
//! - Each shard has its own RwLock, minimizing contention
//! - Power-of-2 shard count enables fast modulo via bitwise AND
//! - Read-modify-write happens under a single shard write lock

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Single shard
struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Shard<V> {
    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

/// Sharded map with a power-of-two shard count
pub struct ShardedMap<V, const N: usize = 64> {
    shards: Box<[Shard<V>]>,
}

impl<V, const N: usize> Default for ShardedMap<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, const N: usize> ShardedMap<V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "shard count must be a power of two");
        let shards: Vec<Shard<V>> = (0..N).map(|_| Shard::default()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Shard<V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (N - 1)]
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).map.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard_for(key).map.write().remove(key)
    }

    /// Replace the value at `key` under the shard write lock
    ///
    /// `f` receives the current value (if any) and returns the value to store
    /// (`None` leaves the key absent) plus a result passed back to the caller.
    pub fn modify<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(Option<V>) -> (Option<V>, R),
    {
        let mut guard = self.shard_for(key).map.write();
        let current = guard.remove(key);
        let (next, result) = f(current);
        if let Some(value) = next {
            guard.insert(key.to_string(), value);
        }
        result
    }

    /// Keep only the entries for which `keep` returns true
    ///
    /// Returns the removed entries.
    pub fn retain<F>(&self, mut keep: F) -> Vec<(String, V)>
    where
        F: FnMut(&str, &V) -> bool,
    {
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            let mut guard = shard.map.write();
            let doomed: Vec<String> = guard
                .iter()
                .filter(|(k, v)| !keep(k, v))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                if let Some(value) = guard.remove(&key) {
                    removed.push((key, value));
                }
            }
        }
        removed
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(String, V)>
    where
        V: Clone,
    {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let guard = shard.map.read();
            out.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    impl<V, const N: usize> ShardedMap<V, N> {
        fn insert(&self, key: String, value: V) -> Option<V> {
            self.modify(&key, |old| (Some(value), old))
        }

        fn shard_lens(&self) -> Vec<usize> {
            self.shards.iter().map(|s| s.len()).collect()
        }

        fn clear(&self) {
            for shard in self.shards.iter() {
                shard.map.write().clear();
            }
        }
    }

    #[test]
    fn test_sharded_map_creation() {
        let map: ShardedMap<i32, 16> = ShardedMap::new();
        assert!(map.is_empty());
        assert_eq!(map.shard_lens().len(), 16);
    }

    #[test]
    fn test_sharded_map_insert_get_remove() {
        let map: ShardedMap<i32, 16> = ShardedMap::new();

        assert_eq!(map.insert("key1".to_string(), 42), None);
        assert_eq!(map.insert("key1".to_string(), 43), Some(42));
        assert_eq!(map.get("key1"), Some(43));

        assert_eq!(map.remove("key1"), Some(43));
        assert_eq!(map.get("key1"), None);
        assert_eq!(map.remove("key1"), None);
    }

    #[test]
    fn test_modify_inserts_updates_and_deletes() {
        let map: ShardedMap<i32, 16> = ShardedMap::new();

        let seen = map.modify("n", |cur| (Some(cur.unwrap_or(0) + 1), cur));
        assert_eq!(seen, None);
        let seen = map.modify("n", |cur| (Some(cur.unwrap_or(0) + 1), cur));
        assert_eq!(seen, Some(1));
        assert_eq!(map.get("n"), Some(2));

        map.modify("n", |_| (None, ()));
        assert!(map.is_empty());
    }

    #[test]
    fn test_retain_returns_removed() {
        let map: ShardedMap<i32, 16> = ShardedMap::new();
        for i in 0..10 {
            map.insert(format!("key{}", i), i);
        }

        let mut removed = map.retain(|_, v| v % 2 == 0);
        removed.sort_by_key(|(_, v)| *v);

        assert_eq!(map.len(), 5);
        assert_eq!(
            removed.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            vec![1, 3, 5, 7, 9]
        );
    }

    #[test]
    fn test_sharded_map_clear() {
        let map: ShardedMap<i32, 16> = ShardedMap::new();
        for i in 0..100 {
            map.insert(format!("key{}", i), i);
        }
        assert_eq!(map.len(), 100);
        assert_eq!(map.entries().len(), 100);

        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_sharded_map_distribution() {
        let map: ShardedMap<i32, 16> = ShardedMap::new();
        for i in 0..1000 {
            map.insert(format!("key{}", i), i);
        }

        let lens = map.shard_lens();
        let max_count = lens.iter().max().unwrap();
        assert!(
            *max_count < 200,
            "Uneven distribution: max shard has {} entries",
            max_count
        );
        let min_count = lens.iter().min().unwrap();
        assert!(
            *min_count > 20,
            "Uneven distribution: min shard has {} entries",
            min_count
        );
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let map: Arc<ShardedMap<i32, 16>> = Arc::new(ShardedMap::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("key-{}-{}", t, i);
                        map.insert(key.clone(), i);
                        map.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 8000);
    }
}
