//! Command dispatch.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   lookup    │───>│ arity check │───>│   handler   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use std::borrow::Cow;
use std::sync::Arc;

use super::registry::CommandTable;
use crate::error::CommandError;
use crate::persistence::AofPermit;
use crate::protocol::RespValue;
use crate::storage::{unix_now, LockManager, StorageEngine};

/// Result of running one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Reply to send back to the client.
    pub reply: RespValue,
    /// Arguments to append to the write log, for successful writes.
    pub log: Option<Vec<Bytes>>,
    /// The client asked to close the connection.
    pub close: bool,
}

impl Outcome {
    fn reply(reply: RespValue) -> Self {
        Self {
            reply,
            log: None,
            close: false,
        }
    }
}

/// Executes requests against the storage engine using the command table.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    table: Arc<CommandTable>,
    /// Orders logged writes per stripe, separate from the storage stripes.
    log_order: Arc<LockManager>,
}

impl CommandHandler {
    /// Creates a handler with the full command table.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self::with_table(storage, Arc::new(CommandTable::new()))
    }

    pub fn with_table(storage: Arc<StorageEngine>, table: Arc<CommandTable>) -> Self {
        let log_order = Arc::new(LockManager::new(storage.locks().stripe_count()));
        Self {
            storage,
            table,
            log_order,
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Runs one command given as raw arguments (name first).
    pub fn dispatch(&self, args: &[Bytes]) -> Outcome {
        let Some(first) = args.first() else {
            return Outcome::reply(RespValue::error("ERR empty command"));
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        let Some(spec) = self.table.get(&name) else {
            return Outcome::reply(CommandError::UnknownCommand(name).to_resp());
        };
        if !spec.check_arity(args.len()) {
            return Outcome::reply(CommandError::WrongArity(name).to_resp());
        }

        // A rewritten command runs as its absolute form, so what executes
        // is exactly what gets logged.
        let rewritten = spec
            .rewrite
            .and_then(|f| f(args, unix_now()))
            .and_then(|rewritten| {
                let target = String::from_utf8_lossy(rewritten.first()?).to_ascii_lowercase();
                self.table.get(&target).map(|target| (target, rewritten))
            });
        let (spec, args): (_, Cow<'_, [Bytes]>) = match rewritten {
            Some((target, rewritten)) => (target, Cow::Owned(rewritten)),
            None => (spec, Cow::Borrowed(args)),
        };

        match (spec.handler)(&self.storage, &args) {
            Ok(reply) => {
                let log = match (spec.write, spec.effect) {
                    (false, _) => None,
                    (true, Some(effect)) => effect(&args, &reply),
                    (true, None) => Some(args.into_owned()),
                };
                Outcome {
                    reply,
                    log,
                    close: name == "quit",
                }
            }
            Err(e) => Outcome::reply(e.to_resp()),
        }
    }

    /// Whether `args` names a registered mutating command.
    pub fn is_write(&self, args: &[Bytes]) -> bool {
        args.first()
            .and_then(|first| {
                let name = String::from_utf8_lossy(first).to_ascii_lowercase();
                self.table.get(&name).map(|spec| spec.write)
            })
            .unwrap_or(false)
    }

    /// Runs a write and queues its log entry before any conflicting write
    /// can run.
    ///
    /// Writes whose arguments share a stripe in the ordering pool are
    /// serialized here, so the log sees them in the order they changed the
    /// store. Keyspace-wide commands take every stripe. The permit is
    /// released unused when nothing needs logging.
    pub fn dispatch_logged(&self, args: &[Bytes], permit: AofPermit<'_>) -> Outcome {
        let _order = if args.len() < 2 || self.is_keyspace(args) {
            let all: Vec<usize> = (0..self.log_order.stripe_count()).collect();
            self.log_order.lock_stripes(&all)
        } else {
            self.log_order.lock_many(&args[1..])
        };

        let outcome = self.dispatch(args);
        if let Some(log) = &outcome.log {
            permit.commit(log);
        }
        outcome
    }

    fn is_keyspace(&self, args: &[Bytes]) -> bool {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_lowercase();
        self.table.get(&name).is_some_and(|spec| spec.keyspace)
    }

    /// Executes a decoded request and returns only the reply.
    pub fn execute(&self, request: RespValue) -> RespValue {
        match request.into_command() {
            Some(args) => self.dispatch(&args).reply,
            None => RespValue::error("ERR invalid command format"),
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("storage", &self.storage)
            .field("commands", &self.table.len())
            .finish()
    }
}
