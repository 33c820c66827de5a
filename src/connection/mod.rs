//! Connection Module
//!
//! Each accepted client is served by its own tokio task running a
//! [`ConnectionHandler`]. Requests on one connection are handled strictly
//! in order; different connections proceed independently and only meet in
//! the storage engine's stripe locks.
//!
//! ```text
//!   Server::run ──accept()──> tokio::spawn(handle_connection(..))
//!                                   │
//!                                   ▼
//!              RespStream ──> CommandHandler ──> reply buffer ──> socket
//!                                   │
//!                                   └──> AofSender (successful writes)
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
