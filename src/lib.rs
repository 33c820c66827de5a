//! # memkv - An In-Memory, Redis-Compatible Key-Value Store
//!
//! memkv speaks RESP over TCP and keeps strings, lists, hashes, sets and
//! sorted sets in a sharded in-memory store. Writes can be logged to an
//! append-only file that is replayed on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               memkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │──┐               │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │  │               │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘  │ writes        │
//! │                            │                  │         ▼               │
//! │                     ┌──────┴──────┐           │   ┌───────────┐         │
//! │                     │ RespStream  │           │   │ AofWriter │──> file │
//! │                     │ RespDecoder │           │   └───────────┘         │
//! │                     └─────────────┘           ▼                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                         StorageEngine                             │  │
//! │  │  LockManager (stripes)   ShardedMap<Value>   ShardedMap<expiry>   │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use memkv::{Config, Server};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let server = Server::from_config(&config).await?;
//! let listener = TcpListener::bind(config.bind_address()).await?;
//! server.run(listener, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP values, the resumable decoder and the async stream
//! - [`storage`]: sharded store, lock stripes, lazy expiry, sorted sets
//! - [`commands`]: command table and per-type command families
//! - [`persistence`]: append-only log writer and replay
//! - [`connection`]: per-client read/execute/reply loop
//! - [`server`]: accept loop and startup
//!
//! ## Design Highlights
//!
//! ### Two levels of locking
//!
//! Shard locks inside [`storage::ShardedMap`] keep each map operation
//! consistent. Command-level atomicity comes from the
//! [`storage::LockManager`] stripes, which multi-key commands take in
//! ascending index order.
//!
//! ### Lazy Expiry
//!
//! Keys with a TTL are removed when a command touches them after their
//! deadline. There is no background sweeper.

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, CommandTable};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use error::CommandError;
pub use persistence::{AofSender, AofWriter};
pub use protocol::{ParseError, RespDecoder, RespStream, RespValue};
pub use server::Server;
pub use storage::StorageEngine;

/// The default port memkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host memkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of memkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
