//! Command table.
//!
//! Built once at startup and shared by reference with every connection.
//! Arity follows the Redis convention and counts the command name: a
//! positive arity is exact, a negative one is a minimum.

use bytes::Bytes;
use std::collections::HashMap;

use crate::error::CommandResult;
use crate::protocol::RespValue;
use crate::storage::StorageEngine;

use super::{hashes, keys, lists, server, sets, strings, zsets};

/// A command implementation. `args[0]` is the command name as sent.
pub type CommandFn = fn(&StorageEngine, &[Bytes]) -> CommandResult;

/// Rewrites a command with a relative expiry into its absolute form,
/// given the current unix time. Returns `None` to keep the original.
pub type RewriteFn = fn(&[Bytes], i64) -> Option<Vec<Bytes>>;

/// Builds the logged command from a successful reply, for commands whose
/// outcome depends on more than their arguments. `None` logs nothing.
pub type EffectFn = fn(&[Bytes], &RespValue) -> Option<Vec<Bytes>>;

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    /// Mutating commands are appended to the write log.
    pub write: bool,
    pub handler: CommandFn,
    pub rewrite: Option<RewriteFn>,
    pub effect: Option<EffectFn>,
    /// Touches every key rather than the ones named in its arguments.
    pub keyspace: bool,
}

impl CommandSpec {
    pub fn check_arity(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = self.arity as i64;
        if arity >= 0 {
            argc == arity
        } else {
            argc >= -arity
        }
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("write", &self.write)
            .field("keyspace", &self.keyspace)
            .finish()
    }
}

/// Lookup from lowercase command name to its spec.
#[derive(Debug)]
pub struct CommandTable {
    commands: HashMap<&'static str, CommandSpec>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// Builds the table with every supported command.
    pub fn new() -> Self {
        let mut table = Self::empty();
        keys::register(&mut table);
        strings::register(&mut table);
        lists::register(&mut table);
        hashes::register(&mut table);
        sets::register(&mut table);
        zsets::register(&mut table);
        server::register(&mut table);
        table
    }

    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn insert(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    fn spec(name: &'static str, arity: i32, write: bool, handler: CommandFn) -> CommandSpec {
        CommandSpec {
            name,
            arity,
            write,
            handler,
            rewrite: None,
            effect: None,
            keyspace: false,
        }
    }

    /// Registers a read-only command.
    pub fn read(&mut self, name: &'static str, arity: i32, handler: CommandFn) {
        self.insert(Self::spec(name, arity, false, handler));
    }

    /// Registers a mutating command.
    pub fn write(&mut self, name: &'static str, arity: i32, handler: CommandFn) {
        self.insert(Self::spec(name, arity, true, handler));
    }

    /// Registers a mutating command that clears or rewrites the whole key space.
    pub fn write_keyspace(&mut self, name: &'static str, arity: i32, handler: CommandFn) {
        self.insert(CommandSpec {
            keyspace: true,
            ..Self::spec(name, arity, true, handler)
        });
    }

    /// Registers a mutating command logged as the effect `effect` derives
    /// from its reply.
    pub fn write_with_effect(
        &mut self,
        name: &'static str,
        arity: i32,
        handler: CommandFn,
        effect: EffectFn,
    ) {
        self.insert(CommandSpec {
            effect: Some(effect),
            ..Self::spec(name, arity, true, handler)
        });
    }

    /// Registers a mutating command whose logged form is rewritten.
    pub fn write_with_rewrite(
        &mut self,
        name: &'static str,
        arity: i32,
        handler: CommandFn,
        rewrite: RewriteFn,
    ) {
        self.insert(CommandSpec {
            rewrite: Some(rewrite),
            ..Self::spec(name, arity, true, handler)
        });
    }

    /// Looks up a command by its lowercase name.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity() {
        let table = CommandTable::new();
        let get = table.get("get").unwrap();
        assert!(get.check_arity(2));
        assert!(!get.check_arity(3));

        let del = table.get("del").unwrap();
        assert!(!del.check_arity(1));
        assert!(del.check_arity(2));
        assert!(del.check_arity(10));
    }

    #[test]
    fn test_write_classification() {
        let table = CommandTable::new();
        for name in ["set", "del", "lpush", "hset", "sadd", "zadd", "expire", "flushall"] {
            assert!(table.get(name).unwrap().write, "{} should be a write", name);
        }
        for name in ["get", "ttl", "lrange", "hgetall", "smembers", "zrange", "ping"] {
            assert!(!table.get(name).unwrap().write, "{} should be a read", name);
        }
    }

    #[test]
    fn test_log_hooks() {
        let table = CommandTable::new();
        assert!(table.get("flushall").unwrap().keyspace);
        assert!(table.get("flushdb").unwrap().keyspace);
        assert!(!table.get("del").unwrap().keyspace);
        assert!(table.get("spop").unwrap().effect.is_some());
        assert!(table.get("expire").unwrap().rewrite.is_some());
        assert!(table.get("set").unwrap().effect.is_none());
    }

    #[test]
    fn test_lowercase_lookup() {
        let table = CommandTable::new();
        assert!(table.get("set").is_some());
        assert!(table.get("SET").is_none());
        assert!(table.names().windows(2).all(|w| w[0] < w[1]));
    }
}
