//! Sharded Concurrent Map
//!
//! The backbone of the store: a fixed array of shards, each guarded by its
//! own `RwLock`. A key always lives in shard `hash_key(key) % N`, so a
//! single-key operation only ever touches one shard lock.
//!
//! ## Shard representation
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────────┐
//! │ Shard (len < 8)          │  treeify │ Shard (len >= 8)         │
//! │ List: [(k, v), (k, v)..] │ ───────► │ Tree: BTreeMap<k, v>     │
//! └──────────────────────────┘          └──────────────────────────┘
//! ```
//!
//! Small shards are a flat association list scanned linearly. Once a shard
//! holds `TREEIFY_THRESHOLD` entries it is rebuilt as an ordered tree and
//! never converted back.
//!
//! Shard locks only protect the map's internal representation. Command-level
//! atomicity is the job of [`LockManager`](super::locks::LockManager).

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::hash::bucket_for;

/// Number of entries at which a shard switches from list to tree form.
pub const TREEIFY_THRESHOLD: usize = 8;

enum Bucket<V> {
    List(Vec<(Bytes, V)>),
    Tree(BTreeMap<Bytes, V>),
}

struct Shard<V> {
    bucket: Bucket<V>,
    len: usize,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            bucket: Bucket::List(Vec::new()),
            len: 0,
        }
    }

    fn get(&self, key: &[u8]) -> Option<&V> {
        match &self.bucket {
            Bucket::List(entries) => entries
                .iter()
                .find(|(k, _)| k.as_ref() == key)
                .map(|(_, v)| v),
            Bucket::Tree(tree) => tree.get(key),
        }
    }

    fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        match &mut self.bucket {
            Bucket::List(entries) => entries
                .iter_mut()
                .find(|(k, _)| k.as_ref() == key)
                .map(|(_, v)| v),
            Bucket::Tree(tree) => tree.get_mut(key),
        }
    }

    /// Inserts a key that is known to be absent.
    fn insert_new(&mut self, key: Bytes, value: V) {
        self.grow();
        match &mut self.bucket {
            Bucket::List(entries) => entries.push((key, value)),
            Bucket::Tree(tree) => {
                tree.insert(key, value);
            }
        }
        self.len += 1;
    }

    /// Returns the slot for `key`, inserting `init()` if absent.
    fn get_or_insert_with(&mut self, key: &Bytes, init: impl FnOnce() -> V) -> (&mut V, bool) {
        if self.get(key).is_none() {
            self.grow();
        }
        match &mut self.bucket {
            Bucket::List(entries) => match entries.iter().position(|(k, _)| k == key) {
                Some(pos) => (&mut entries[pos].1, false),
                None => {
                    entries.push((key.clone(), init()));
                    self.len += 1;
                    let last = entries.len() - 1;
                    (&mut entries[last].1, true)
                }
            },
            Bucket::Tree(tree) => {
                let mut created = false;
                let slot = tree.entry(key.clone()).or_insert_with(|| {
                    created = true;
                    init()
                });
                if created {
                    self.len += 1;
                }
                (slot, created)
            }
        }
    }

    /// Converts to tree form if one more entry reaches the threshold.
    fn grow(&mut self) {
        if self.len + 1 >= TREEIFY_THRESHOLD {
            self.treeify();
        }
    }

    fn treeify(&mut self) {
        if let Bucket::List(entries) = &mut self.bucket {
            let tree: BTreeMap<Bytes, V> = std::mem::take(entries).into_iter().collect();
            self.bucket = Bucket::Tree(tree);
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<V> {
        let removed = match &mut self.bucket {
            Bucket::List(entries) => entries
                .iter()
                .position(|(k, _)| k.as_ref() == key)
                .map(|pos| entries.swap_remove(pos).1),
            Bucket::Tree(tree) => tree.remove(key),
        };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn keys(&self, out: &mut Vec<Bytes>) {
        match &self.bucket {
            Bucket::List(entries) => out.extend(entries.iter().map(|(k, _)| k.clone())),
            Bucket::Tree(tree) => out.extend(tree.keys().cloned()),
        }
    }

    fn is_tree(&self) -> bool {
        matches!(self.bucket, Bucket::Tree(_))
    }
}

/// A thread-safe map from key to `V`, partitioned into a fixed number of shards.
pub struct ShardedMap<V> {
    shards: Box<[RwLock<Shard<V>>]>,
    /// Aggregate entry count, updated atomically across shards.
    count: AtomicUsize,
}

impl<V> ShardedMap<V> {
    /// Creates a map with `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(Shard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            count: AtomicUsize::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `key`.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        bucket_for(key, self.shards.len())
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &RwLock<Shard<V>> {
        &self.shards[self.shard_index(key)]
    }

    /// Upserts `key`. Returns true if the key was newly created.
    pub fn set(&self, key: Bytes, value: V) -> bool {
        let mut shard = self.shard(&key).write();
        if let Some(slot) = shard.get_mut(&key) {
            *slot = value;
            return false;
        }
        shard.insert_new(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Overwrites `key` only if it already exists.
    pub fn set_if_exist(&self, key: &[u8], value: V) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Inserts `key` only if it does not exist yet.
    pub fn set_if_not_exist(&self, key: Bytes, value: V) -> bool {
        let mut shard = self.shard(&key).write();
        if shard.get(&key).is_some() {
            return false;
        }
        shard.insert_new(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.shard(key).read().get(key).is_some()
    }

    /// Runs `f` against the value under a shared shard lock.
    pub fn view<R>(&self, key: &[u8], f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(f)
    }

    /// Runs `f` against the value under an exclusive shard lock.
    pub fn update<R>(&self, key: &[u8], f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard(key).write().get_mut(key).map(f)
    }

    /// Runs `f` against the value, inserting `init()` first if the key is absent.
    pub fn upsert_with<R>(
        &self,
        key: &Bytes,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut shard = self.shard(key).write();
        let (value, created) = shard.get_or_insert_with(key, init);
        if created {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        f(value)
    }

    /// Removes `key`. Returns true if it was present.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.remove(key).is_some()
    }

    /// Removes `key` and returns its value.
    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let removed = self.shard(key).write().remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects every key, locking one shard at a time.
    ///
    /// Not a point-in-time snapshot when writers are active.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            shard.read().keys(&mut out);
        }
        out
    }

    /// Keys held by the shard at `index`.
    pub fn shard_keys(&self, index: usize) -> Vec<Bytes> {
        let mut out = Vec::new();
        self.shards[index].read().keys(&mut out);
        out
    }

    /// Empties every shard, keeping the shard count.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let removed = shard.len;
            *shard = Shard::new();
            self.count.fetch_sub(removed, Ordering::Relaxed);
        }
    }

    /// Entry count of a single shard.
    pub fn shard_len(&self, index: usize) -> usize {
        self.shards[index].read().len
    }

    /// Whether the given shard has been converted to tree form.
    pub fn is_treeified(&self, index: usize) -> bool {
        self.shards[index].read().is_tree()
    }
}

impl<V> std::fmt::Debug for ShardedMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedMap")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    /// Finds `n` distinct keys that land in shard `target`.
    fn keys_in_shard(map: &ShardedMap<i32>, target: usize, n: usize) -> Vec<Bytes> {
        (0..)
            .map(|i| key(&format!("k{}", i)))
            .filter(|k| map.shard_index(k) == target)
            .take(n)
            .collect()
    }

    #[test]
    fn test_set_and_get() {
        let map = ShardedMap::new(16);
        assert!(map.set(key("x"), "1".to_string()));
        assert_eq!(map.get(b"x"), Some("1".to_string()));
        assert!(!map.set(key("x"), "2".to_string()));
        assert_eq!(map.get(b"x"), Some("2".to_string()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let map: ShardedMap<i32> = ShardedMap::new(4);
        assert_eq!(map.get(b"nope"), None);
        assert!(!map.delete(b"nope"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_conditional_set() {
        let map = ShardedMap::new(4);
        assert!(!map.set_if_exist(b"a", 1));
        assert!(map.set_if_not_exist(key("a"), 1));
        assert!(!map.set_if_not_exist(key("a"), 2));
        assert_eq!(map.get(b"a"), Some(1));
        assert!(map.set_if_exist(b"a", 3));
        assert_eq!(map.get(b"a"), Some(3));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_delete_updates_count() {
        let map = ShardedMap::new(4);
        map.set(key("a"), 1);
        map.set(key("b"), 2);
        assert!(map.delete(b"a"));
        assert!(!map.delete(b"a"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(b"b"), Some(2));
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_treeify_keeps_entries_reachable() {
        let map = ShardedMap::new(8);
        let keys = keys_in_shard(&map, 3, 12);

        for (i, k) in keys.iter().take(TREEIFY_THRESHOLD - 1).enumerate() {
            map.set(k.clone(), i as i32);
        }
        assert!(!map.is_treeified(3));

        for (i, k) in keys.iter().enumerate().skip(TREEIFY_THRESHOLD - 1) {
            map.set(k.clone(), i as i32);
        }
        assert!(map.is_treeified(3));
        assert_eq!(map.shard_len(3), keys.len());

        for (i, k) in keys.iter().enumerate() {
            assert_eq!(map.get(k), Some(i as i32));
        }

        let mut shard_keys = map.shard_keys(3);
        shard_keys.sort();
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(shard_keys, expected);

        // Conversion is one-way.
        for k in &keys[..10] {
            assert!(map.delete(k));
        }
        assert!(map.is_treeified(3));
        assert_eq!(map.get(&keys[11]), Some(11));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_delete_before_treeify() {
        let map = ShardedMap::new(8);
        let keys = keys_in_shard(&map, 5, TREEIFY_THRESHOLD + 2);

        for (i, k) in keys.iter().take(TREEIFY_THRESHOLD - 1).enumerate() {
            map.set(k.clone(), i as i32);
        }
        assert!(map.delete(&keys[0]));
        assert!(!map.delete(&keys[0]));
        assert!(!map.is_treeified(5));
        assert_eq!(map.shard_len(5), TREEIFY_THRESHOLD - 2);
        for (i, k) in keys.iter().enumerate().take(TREEIFY_THRESHOLD - 1).skip(1) {
            assert_eq!(map.get(k), Some(i as i32));
        }

        for (i, k) in keys.iter().enumerate().skip(TREEIFY_THRESHOLD - 1) {
            map.set(k.clone(), i as i32);
        }
        assert!(map.is_treeified(5));
        assert_eq!(map.shard_len(5), keys.len() - 1);
        assert_eq!(map.len(), keys.len() - 1);
        assert_eq!(map.get(&keys[0]), None);
        for (i, k) in keys.iter().enumerate().skip(1) {
            assert_eq!(map.get(k), Some(i as i32));
        }
    }

    #[test]
    fn test_view_update_upsert() {
        let map = ShardedMap::new(4);
        assert_eq!(map.view(b"n", |v: &i32| *v), None);
        let n = map.upsert_with(&key("n"), || 10, |v| {
            *v += 1;
            *v
        });
        assert_eq!(n, 11);
        assert_eq!(map.update(b"n", |v| std::mem::replace(v, 0)), Some(11));
        assert_eq!(map.view(b"n", |v| *v), Some(0));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_keys_and_clear() {
        let map = ShardedMap::new(4);
        for i in 0..50 {
            map.set(key(&format!("key{}", i)), i);
        }
        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys.len(), 50);
        assert!(keys.contains(&key("key42")));

        map.clear();
        assert_eq!(map.len(), 0);
        assert!(map.keys().is_empty());
        assert_eq!(map.shard_count(), 4);
    }

    #[test]
    fn test_concurrent_count_is_exact() {
        let map = Arc::new(ShardedMap::new(4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..500 {
                        map.set(key(&format!("t{}-{}", t, i)), i);
                    }
                    for i in (0..500).step_by(2) {
                        map.delete(format!("t{}-{}", t, i).as_bytes());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), 8 * 250);
        assert_eq!(map.keys().len(), 8 * 250);
    }
}
