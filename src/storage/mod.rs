//! Storage Engine Module
//!
//! The in-memory key space and everything layered directly on it.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │        StorageEngine         │
//!                 │  check_ttl / set_ttl (lazy)  │
//!                 └──────┬───────────────┬───────┘
//!                        │               │
//!           ┌────────────▼───┐    ┌──────▼─────────────┐
//!           │  LockManager   │    │ ShardedMap<Value>  │
//!           │  M stripes     │    │ ShardedMap<i64>    │
//!           └────────────────┘    └──────┬─────────────┘
//!                                        │ Value::SortedSet
//!                                 ┌──────▼─────────────┐
//!                                 │ SkipList + dict    │
//!                                 └────────────────────┘
//! ```
//!
//! Shard and stripe selection both use the salted FNV-1 hash in [`hash`].

pub mod engine;
pub mod expiry;
pub mod hash;
pub mod locks;
pub mod pattern;
pub mod shard_map;
pub mod sorted_set;
pub mod value;

pub use engine::{StorageEngine, StorageStats, DEFAULT_SHARDS};
pub use expiry::unix_now;
pub use locks::LockManager;
pub use shard_map::{ShardedMap, TREEIFY_THRESHOLD};
pub use sorted_set::{ScoreBound, SkipList, SortedSet};
pub use value::Value;
