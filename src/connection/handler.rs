//! Per-connection loop.
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  RespStream::next()          │◄──┐
//!    │        │                     │   │
//!    │        ▼                     │   │
//!    │  AOF reserve (writes only)   │   │
//!    │        │                     │   │
//!    │        ▼                     │   │
//!    │  CommandHandler::dispatch()  │   │
//!    │        │                     │   │
//!    │        ▼                     │   │
//!    │  write reply ────────────────┼───┘
//!    └──────────────────────────────┘
//!        │ end of stream / read error / QUIT
//!        ▼
//! 3. Handler task ends
//! ```
//!
//! A malformed frame gets an `-ERR Protocol error` reply and the loop keeps
//! reading; the decoder has already dropped the bad bytes. Replies are
//! buffered and flushed before the loop waits on the socket, so pipelined
//! requests share a write.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::commands::{CommandHandler, Outcome};
use crate::persistence::AofSender;
use crate::protocol::{RespStream, RespValue};

/// Counters shared by every connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client disconnected")]
    ClientDisconnected,
}

/// Serves one client until it disconnects.
pub struct ConnectionHandler {
    reader: RespStream<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    addr: SocketAddr,
    command_handler: CommandHandler,
    aof: Option<AofSender>,
    stats: Arc<ConnectionStats>,
    out: Vec<u8>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        aof: Option<AofSender>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: RespStream::new(read_half),
            writer: BufWriter::new(write_half),
            addr,
            command_handler,
            aof,
            stats,
            out: Vec::with_capacity(1024),
        }
    }

    /// Runs the read/execute/reply loop to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;
        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Replies go out whenever the next request is not already buffered.
            let frame = match self.reader.try_next() {
                Some(frame) => frame,
                None => {
                    self.flush().await?;
                    match self.reader.next().await {
                        Some(frame) => frame,
                        None => return Err(ConnectionError::ClientDisconnected),
                    }
                }
            };

            let request = match frame {
                Ok(request) => request,
                Err(e) if e.is_fatal() => {
                    debug!(client = %self.addr, error = %e, "Read failed");
                    return Err(ConnectionError::ClientDisconnected);
                }
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Protocol error");
                    self.stats.protocol_error();
                    self.queue(&RespValue::error(format!("ERR Protocol error: {}", e)));
                    continue;
                }
            };

            // Empty arrays and blank inline lines are ignored.
            let Some(args) = request.into_command().filter(|args| !args.is_empty()) else {
                continue;
            };

            trace!(client = %self.addr, argc = args.len(), "Executing command");
            let outcome = self.execute(&args).await;
            self.stats.command_processed();

            self.queue(&outcome.reply);
            if outcome.close {
                self.flush().await?;
                return Ok(());
            }
        }
    }

    /// Runs one command. Writes are logged while their keys are still
    /// ordered against other writers.
    async fn execute(&self, args: &[Bytes]) -> Outcome {
        let Some(aof) = self.aof.as_ref().filter(|_| self.command_handler.is_write(args)) else {
            return self.command_handler.dispatch(args);
        };
        match aof.reserve().await {
            Ok(permit) => self.command_handler.dispatch_logged(args, permit),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Failed to queue write for the append-only log");
                self.command_handler.dispatch(args)
            }
        }
    }

    fn queue(&mut self, reply: &RespValue) {
        reply.serialize_into(&mut self.out);
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.out.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.out).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(self.out.len());
        trace!(client = %self.addr, bytes = self.out.len(), "Sent replies");
        self.out.clear();
        Ok(())
    }
}

/// Serves a client connection to completion, swallowing ordinary
/// disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    aof: Option<AofSender>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, aof, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => debug!(client = %addr, error = %e, "Connection ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = CommandHandler::new(Arc::new(StorageEngine::with_shards(16, 0)));
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler.clone(), None, stats));
            }
        });

        (addr, stats)
    }

    async fn read_exact_len(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        let expected = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_connection() {
        let (addr, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"$-5\r\n").await.unwrap();
        let mut buf = [0u8; 128];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf[..n].starts_with(b"-ERR Protocol error"));

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 7).await, b"+PONG\r\n");
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exact_len(&mut client, 7).await;
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
