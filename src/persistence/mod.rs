//! Persistence Module
//!
//! Durability is provided by an append-only log of write commands in
//! their RESP form. There are no snapshots; the log is replayed in full on
//! startup, before the listener accepts connections.

pub mod aof;

pub use aof::{replay, AofError, AofPermit, AofSender, AofWriter, DEFAULT_QUEUE_CAPACITY};
