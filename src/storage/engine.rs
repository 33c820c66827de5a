//! Storage Engine
//!
//! Ties the storage primitives together: the primary key space, the TTL
//! index, the stripe lock manager and keyspace statistics.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        StorageEngine                         │
//! │                                                              │
//! │  locks: LockManager   [stripe 0][stripe 1] ... [stripe M-1]  │
//! │             │ per-key command atomicity                      │
//! │             ▼                                                │
//! │  data: ShardedMap<Value>  [shard 0] ... [shard N-1]          │
//! │  ttl:  ShardedMap<i64>    [shard 0] ... [shard N-1]          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Command handlers take the key's stripe lock (shared for reads, exclusive
//! for writes) before touching `data` or `ttl`. The shard locks inside each
//! map are never relied on for command-level atomicity.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::locks::{LockManager, MultiWriteGuard};
use super::pattern::glob_match;
use super::shard_map::ShardedMap;
use super::value::Value;

/// Default number of shards for both the key space and the TTL index.
pub const DEFAULT_SHARDS: usize = 1024;

/// The main storage engine.
///
/// Designed to be wrapped in an `Arc` and shared by every connection task.
///
/// # Example
///
/// ```
/// use memkv::storage::{StorageEngine, Value};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// {
///     let _guard = engine.locks().lock(b"name");
///     engine.data().set(Bytes::from("name"), Value::Str(Bytes::from("Ariz")));
/// }
/// assert!(engine.check_ttl(b"name"));
/// assert_eq!(engine.len(), 1);
/// ```
pub struct StorageEngine {
    data: ShardedMap<Value>,
    ttl: ShardedMap<i64>,
    locks: LockManager,

    /// Statistics: lookups that found a key
    hits: AtomicU64,

    /// Statistics: lookups that found nothing
    misses: AtomicU64,

    /// Statistics: keys removed by lazy expiry
    pub(super) expired_count: AtomicU64,

    created_at: Instant,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("shards", &self.data.shard_count())
            .field("stripes", &self.locks.stripe_count())
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an engine with the default shard count and twice as many stripes.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS, 0)
    }

    /// Creates an engine with `shards` shards and `stripes` lock stripes.
    ///
    /// A stripe count of 0 means twice the shard count.
    pub fn with_shards(shards: usize, stripes: usize) -> Self {
        let shards = shards.max(1);
        let stripes = if stripes == 0 { shards * 2 } else { stripes };
        Self {
            data: ShardedMap::new(shards),
            ttl: ShardedMap::new(shards),
            locks: LockManager::new(stripes),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// The primary key space.
    pub fn data(&self) -> &ShardedMap<Value> {
        &self.data
    }

    /// Key → absolute expiry (unix seconds).
    pub fn ttl_index(&self) -> &ShardedMap<i64> {
        &self.ttl
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Removes `key` from the TTL index and the key space.
    ///
    /// The caller must hold the key's exclusive stripe lock.
    pub fn remove_key(&self, key: &[u8]) -> Option<Value> {
        self.ttl.delete(key);
        self.data.remove(key)
    }

    /// Stores `value` under `key`, dropping any previous TTL.
    ///
    /// The caller must hold the key's exclusive stripe lock.
    pub fn put(&self, key: &Bytes, value: Value) {
        self.ttl.delete(key);
        self.data.set(key.clone(), value);
    }

    /// Deletes `key` if its container value has become empty.
    ///
    /// The caller must hold the key's exclusive stripe lock.
    pub fn remove_if_empty(&self, key: &[u8]) -> bool {
        let empty = self
            .data
            .view(key, Value::is_empty_container)
            .unwrap_or(false);
        if empty {
            self.remove_key(key);
        }
        empty
    }

    /// Runs `f` on the value under `key`, recording a keyspace hit or miss.
    pub fn lookup<R>(&self, key: &[u8], f: impl FnOnce(&Value) -> R) -> Option<R> {
        let result = self.data.view(key, f);
        self.record_lookup(result.is_some());
        result
    }

    pub fn record_lookup(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of keys in the key space.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Live keys matching the glob `pattern`.
    ///
    /// Expired keys met along the way are removed. The result is not a
    /// point-in-time snapshot when writers are active.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        self.data
            .keys()
            .into_iter()
            .filter(|k| glob_match(pattern, k))
            .filter(|k| self.check_ttl(k) && self.data.contains_key(k))
            .collect()
    }

    /// One step of a cursor walk over the key space.
    ///
    /// The cursor is a shard index. Whole shards are visited until at least
    /// `count` keys have been examined, and the returned cursor is 0 once the
    /// last shard has been seen. A key present for the whole walk is
    /// returned at least once.
    pub fn scan(&self, cursor: usize, count: usize, pattern: Option<&[u8]>) -> (usize, Vec<Bytes>) {
        let shards = self.data.shard_count();
        let mut index = cursor;
        let mut examined = 0;
        let mut found = Vec::new();
        while index < shards && examined < count.max(1) {
            let keys = self.data.shard_keys(index);
            examined += keys.len();
            found.extend(
                keys.into_iter()
                    .filter(|k| pattern.map_or(true, |p| glob_match(p, k)))
                    .filter(|k| self.check_ttl(k) && self.data.contains_key(k)),
            );
            index += 1;
        }
        let next = if index >= shards { 0 } else { index };
        (next, found)
    }

    /// Exclusive lock on every stripe.
    pub fn lock_all(&self) -> MultiWriteGuard<'_> {
        let all: Vec<usize> = (0..self.locks.stripe_count()).collect();
        self.locks.lock_stripes(&all)
    }

    /// Removes every key.
    pub fn flush(&self) {
        let _guard = self.lock_all();
        self.ttl.clear();
        self.data.clear();
    }

    /// Returns a snapshot of keyspace statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.data.len(),
            volatile_keys: self.ttl.len(),
            expired_keys: self.expired_count.load(Ordering::Relaxed),
            keyspace_hits: self.hits.load(Ordering::Relaxed),
            keyspace_misses: self.misses.load(Ordering::Relaxed),
            shards: self.data.shard_count(),
            stripes: self.locks.stripe_count(),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Statistics about the storage engine.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: usize,

    /// Number of keys with an expiry
    pub volatile_keys: usize,

    /// Keys removed by lazy expiry since startup
    pub expired_keys: u64,

    pub keyspace_hits: u64,
    pub keyspace_misses: u64,

    pub shards: usize,
    pub stripes: usize,

    /// Seconds since the engine was created
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::with_shards(16, 0);
        engine.put(&b("x"), Value::Str(b("1")));
        let got = engine.lookup(b"x", |v| v.as_str().cloned());
        assert_eq!(got, Some(Ok(b("1"))));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_missing_key_is_a_miss() {
        let engine = StorageEngine::with_shards(4, 0);
        assert!(engine.lookup(b"nope", |_| ()).is_none());
        engine.put(&b("k"), Value::Str(b("v")));
        assert!(engine.lookup(b"k", |_| ()).is_some());
        let stats = engine.stats();
        assert_eq!(stats.keyspace_misses, 1);
        assert_eq!(stats.keyspace_hits, 1);
    }

    #[test]
    fn test_stripes_default_to_twice_shards() {
        let engine = StorageEngine::with_shards(8, 0);
        assert_eq!(engine.locks().stripe_count(), 16);
        let engine = StorageEngine::with_shards(8, 5);
        assert_eq!(engine.locks().stripe_count(), 5);
    }

    #[test]
    fn test_remove_if_empty() {
        let engine = StorageEngine::with_shards(4, 0);
        engine.put(&b("list"), Value::new_list());
        engine.ttl_index().set(b("list"), i64::MAX);
        engine.put(&b("str"), Value::Str(Bytes::new()));

        assert!(engine.remove_if_empty(b"list"));
        assert!(!engine.data().contains_key(b"list"));
        assert!(!engine.ttl_index().contains_key(b"list"));

        assert!(!engine.remove_if_empty(b"str"));
        assert!(!engine.remove_if_empty(b"missing"));
    }

    #[test]
    fn test_put_clears_ttl() {
        let engine = StorageEngine::with_shards(4, 0);
        engine.put(&b("k"), Value::Str(b("v")));
        engine.ttl_index().set(b("k"), 10);
        engine.put(&b("k"), Value::Str(b("w")));
        assert!(!engine.ttl_index().contains_key(b"k"));
    }

    #[test]
    fn test_keys_pattern() {
        let engine = StorageEngine::with_shards(8, 0);
        for k in ["user:1", "user:2", "session:1", "other"] {
            engine.put(&b(k), Value::Str(b("v")));
        }
        let mut keys = engine.keys(b"user:*");
        keys.sort();
        assert_eq!(keys, vec![b("user:1"), b("user:2")]);
        assert_eq!(engine.keys(b"*").len(), 4);
    }

    #[test]
    fn test_scan_visits_every_key() {
        let engine = StorageEngine::with_shards(8, 0);
        for i in 0..40 {
            engine.put(&b(&format!("k{}", i)), Value::Str(b("v")));
        }
        engine.put(&b("gone"), Value::Str(b("v")));
        engine.ttl_index().set(b("gone"), 1);

        let mut seen = Vec::new();
        let mut cursor = 0;
        let mut steps = 0;
        loop {
            let (next, keys) = engine.scan(cursor, 4, None);
            seen.extend(keys);
            steps += 1;
            if next == 0 {
                break;
            }
            assert!(next > cursor);
            cursor = next;
        }
        assert!(steps > 1);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 40);
        assert!(!seen.contains(&b("gone")));

        let (next, keys) = engine.scan(0, 1000, Some(b"k1*"));
        assert_eq!(next, 0);
        assert_eq!(keys.len(), 11);
        assert_eq!(engine.scan(99, 10, None), (0, Vec::new()));
    }

    #[test]
    fn test_flush() {
        let engine = StorageEngine::with_shards(8, 0);
        for i in 0..20 {
            let key = b(&format!("k{}", i));
            engine.put(&key, Value::Str(b("v")));
            engine.ttl_index().set(key, i64::MAX);
        }
        engine.flush();
        assert!(engine.is_empty());
        assert_eq!(engine.stats().volatile_keys, 0);
    }

    #[test]
    fn test_concurrent_access() {
        let engine = Arc::new(StorageEngine::with_shards(16, 0));
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = b(&format!("key-{}-{}", i, j));
                    let _guard = engine.locks().lock(&key);
                    engine.put(&key, Value::Str(b("value")));
                    engine.lookup(&key, |_| ());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }
}
