//! Lazy Key Expiry
//!
//! Expiry is access-triggered only: there is no background sweeper. Every
//! command checks its keys with [`StorageEngine::check_ttl`] before taking
//! the key's stripe lock, and an expired key is deleted right there.
//!
//! Expiry instants are absolute unix timestamps in seconds, held in a
//! second [`ShardedMap`](super::shard_map::ShardedMap). A key is volatile
//! exactly when it has an entry there.

use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::engine::StorageEngine;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl StorageEngine {
    /// Returns false if `key` had expired (and has now been removed).
    ///
    /// Keys without a TTL, including missing keys, are reported live. Must
    /// not be called while holding the key's stripe lock.
    pub fn check_ttl(&self, key: &[u8]) -> bool {
        self.check_ttl_at(key, unix_now())
    }

    /// [`check_ttl`](Self::check_ttl) against an explicit clock.
    pub fn check_ttl_at(&self, key: &[u8], now: i64) -> bool {
        match self.ttl_index().get(key) {
            None => return true,
            Some(at) if at > now => return true,
            Some(_) => {}
        }

        let _guard = self.locks().lock(key);
        // Someone may have persisted, rewritten or expired it meanwhile.
        match self.ttl_index().get(key) {
            Some(at) if at <= now => {
                self.remove_key(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                debug!(key = %String::from_utf8_lossy(key), "Expired key removed");
                false
            }
            _ => true,
        }
    }

    /// Sets the absolute expiry of an existing key.
    ///
    /// Returns false if the key does not exist. The caller must hold the
    /// key's exclusive stripe lock.
    pub fn set_ttl(&self, key: &[u8], expires_at: i64) -> bool {
        if !self.data().contains_key(key) {
            return false;
        }
        self.ttl_index()
            .set(bytes::Bytes::copy_from_slice(key), expires_at);
        true
    }

    /// Makes `key` persistent. Returns true if a TTL was removed.
    pub fn del_ttl(&self, key: &[u8]) -> bool {
        self.ttl_index().delete(key)
    }

    /// Absolute expiry of `key`, if it is volatile.
    pub fn expires_at(&self, key: &[u8]) -> Option<i64> {
        self.ttl_index().get(key)
    }
}
