//! Command Module
//!
//! Receives decoded requests, runs them against the storage engine and
//! returns the reply.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Decoder   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Lookup       │  CommandTable, built once at startup
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Handler discipline
//!
//! Every handler first runs `check_ttl` on its keys without holding any
//! lock, then takes the stripe lock(s) (shared for reads, exclusive for
//! writes, `lock_many` when several keys are involved) and only then
//! touches the key space. Containers left empty are deleted together with
//! their TTL entry.
//!
//! ## Write log
//!
//! A successful write is logged as the arguments it ran with. Relative
//! expiries are rewritten to absolute ones before they run, and commands
//! with a random outcome such as `SPOP` are logged as the effect they had.
//!
//! ## Supported Commands
//!
//! - Keys: `DEL`, `EXISTS`, `KEYS`, `SCAN`, `EXPIRE`, `EXPIREAT`, `PERSIST`,
//!   `TTL`, `TYPE`, `RENAME`
//! - Strings: `SET`, `GET`, `SETNX`, `SETEX`, `MSET`, `MGET`, `INCR`, `INCRBY`,
//!   `DECR`, `DECRBY`, `INCRBYFLOAT`, `APPEND`, `STRLEN`, `GETRANGE`, `SETRANGE`
//! - Lists: `LPUSH`, `RPUSH`, `LPUSHX`, `RPUSHX`, `LPOP`, `RPOP`, `LLEN`,
//!   `LINDEX`, `LRANGE`, `LSET`, `LREM`, `LTRIM`, `LPOS`, `LMOVE`
//! - Hashes: `HSET`, `HSETNX`, `HGET`, `HMGET`, `HDEL`, `HEXISTS`, `HGETALL`,
//!   `HKEYS`, `HVALS`, `HLEN`, `HINCRBY`, `HINCRBYFLOAT`, `HSTRLEN`, `HRANDFIELD`
//! - Sets: `SADD`, `SREM`, `SISMEMBER`, `SMEMBERS`, `SCARD`, `SINTER`,
//!   `SUNION`, `SDIFF`, `SINTERSTORE`, `SUNIONSTORE`, `SDIFFSTORE`, `SMOVE`,
//!   `SPOP`, `SRANDMEMBER`
//! - Sorted sets: `ZADD`, `ZREM`, `ZSCORE`, `ZCARD`, `ZINCRBY`, `ZRANK`,
//!   `ZRANGE`, `ZRANGEBYSCORE`
//! - Server: `PING`, `ECHO`, `DBSIZE`, `FLUSHDB`, `FLUSHALL`, `INFO`, `TIME`, `QUIT`,
//!   `CLIENT`, `CONFIG`, `COMMAND`

mod args;
pub mod handler;
mod hashes;
mod keys;
mod lists;
pub mod registry;
mod server;
mod sets;
mod strings;
mod zsets;

pub use handler::{CommandHandler, Outcome};
pub use registry::{CommandFn, CommandSpec, CommandTable};

#[cfg(test)]
pub(crate) mod testing {
    use super::CommandHandler;
    use crate::protocol::RespValue;
    use crate::storage::StorageEngine;
    use bytes::Bytes;
    use std::sync::Arc;

    pub fn create_handler() -> CommandHandler {
        let storage = Arc::new(StorageEngine::with_shards(16, 0));
        CommandHandler::new(storage)
    }

    pub fn make_command(args: &[&str]) -> RespValue {
        RespValue::Array(
            args.iter()
                .map(|s| RespValue::bulk_string(Bytes::from(s.to_string())))
                .collect(),
        )
    }

    pub fn run(handler: &CommandHandler, args: &[&str]) -> RespValue {
        handler.execute(make_command(args))
    }

    pub fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    pub fn bulks(items: &[&str]) -> RespValue {
        RespValue::Array(items.iter().map(|s| bulk(s)).collect())
    }

    /// Sorts an array reply so set-like results compare deterministically.
    pub fn sorted(reply: RespValue) -> Vec<String> {
        let mut items: Vec<String> = reply
            .into_array()
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        items.sort();
        items
    }
}
