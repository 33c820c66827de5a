//! Striped Key Lock Manager
//!
//! A fixed pool of read-write locks used to make multi-step commands atomic
//! per key. This is a separate layer from the shard locks inside
//! [`ShardedMap`](super::shard_map::ShardedMap): shard locks protect the
//! map's internal representation, stripe locks protect a command's
//! read-modify-write sequence.
//!
//! ## Multi-key locking
//!
//! Locking several keys resolves them to their distinct stripe indices,
//! sorts those ascending and acquires them in that order. Deduplication
//! stops a caller from taking the same exclusive stripe twice, and the
//! global ordering rules out circular waits between callers.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeSet;

use super::hash::bucket_for;

/// Guards held by a multi-key acquisition.
///
/// Locks are released in ascending stripe order when this is dropped.
#[must_use = "the stripes are unlocked as soon as the guard is dropped"]
pub struct MultiGuard<G> {
    guards: Vec<G>,
}

impl<G> MultiGuard<G> {
    /// Number of distinct stripes held.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl<G> Drop for MultiGuard<G> {
    fn drop(&mut self) {
        // Ascending stripe order.
        for guard in self.guards.drain(..) {
            drop(guard);
        }
    }
}

pub type MultiWriteGuard<'a> = MultiGuard<RwLockWriteGuard<'a, ()>>;
pub type MultiReadGuard<'a> = MultiGuard<RwLockReadGuard<'a, ()>>;

/// Fixed pool of per-stripe read-write locks.
pub struct LockManager {
    stripes: Box<[RwLock<()>]>,
}

impl LockManager {
    /// Creates a manager with `stripe_count` stripes (at least one).
    pub fn new(stripe_count: usize) -> Self {
        let stripes = (0..stripe_count.max(1))
            .map(|_| RwLock::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { stripes }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe index for `key`.
    #[inline]
    pub fn stripe(&self, key: &[u8]) -> usize {
        bucket_for(key, self.stripes.len())
    }

    /// Exclusive lock on the stripe owning `key`.
    pub fn lock(&self, key: &[u8]) -> RwLockWriteGuard<'_, ()> {
        self.stripes[self.stripe(key)].write()
    }

    /// Shared lock on the stripe owning `key`.
    pub fn read(&self, key: &[u8]) -> RwLockReadGuard<'_, ()> {
        self.stripes[self.stripe(key)].read()
    }

    /// Distinct stripe indices for `keys`, in ascending order.
    pub fn sorted_stripes<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<usize> {
        keys.iter()
            .map(|k| self.stripe(k.as_ref()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Exclusive locks on every stripe touched by `keys`.
    pub fn lock_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> MultiWriteGuard<'_> {
        self.lock_stripes(&self.sorted_stripes(keys))
    }

    /// Exclusive locks on the given stripe indices.
    ///
    /// `indices` must be sorted ascending and free of duplicates.
    pub fn lock_stripes(&self, indices: &[usize]) -> MultiWriteGuard<'_> {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        let guards = indices.iter().map(|&idx| self.stripes[idx].write()).collect();
        MultiGuard { guards }
    }

    /// Shared locks on every stripe touched by `keys`.
    pub fn read_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> MultiReadGuard<'_> {
        let guards = self
            .sorted_stripes(keys)
            .into_iter()
            .map(|idx| self.stripes[idx].read())
            .collect();
        MultiGuard { guards }
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}
