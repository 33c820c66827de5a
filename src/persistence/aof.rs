//! Append-only log.
//!
//! Successful write commands are serialized as RESP arrays and handed to a
//! background task through a bounded channel. A full queue makes the
//! sending connection wait. On startup the file is fed back through
//! [`RespStream`] and every command is executed again in order.
//!
//! ```text
//!  connection ──append()──> [ mpsc, capacity N ] ──> writer task ──> file
//!  connection ──append()──┘                              │
//!                                        shutdown() ─────┘ drain + flush
//! ```

use anyhow::Context;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::CommandHandler;
use crate::protocol::{RespStream, RespValue};

/// Default queue capacity between connections and the writer task.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Errors from the append-only log.
#[derive(Debug, thiserror::Error)]
pub enum AofError {
    #[error("append-only log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer task has stopped and no longer accepts records.
    #[error("append-only log is closed")]
    Closed,

    #[error("append-only log writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Owns the writer task. Hand out [`AofSender`]s to connections.
#[derive(Debug)]
pub struct AofWriter {
    path: PathBuf,
    tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<u64, std::io::Error>>,
}

impl AofWriter {
    /// Opens `path` for appending (creating it if needed) and spawns the
    /// writer task.
    pub async fn start(path: impl AsRef<Path>, capacity: usize) -> Result<Self, AofError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(writer_loop(file, rx, shutdown_rx));

        info!(path = %path.display(), capacity, "Append-only log opened");
        Ok(Self {
            path,
            tx,
            shutdown_tx,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sender(&self) -> AofSender {
        AofSender {
            tx: self.tx.clone(),
        }
    }

    /// Stops accepting records, writes everything already queued, flushes
    /// and syncs the file. Returns the number of records written.
    pub async fn shutdown(self) -> Result<u64, AofError> {
        let _ = self.shutdown_tx.send(true);
        drop(self.tx);
        let written = self.task.await??;
        info!(path = %self.path.display(), records = written, "Append-only log closed");
        Ok(written)
    }
}

/// Cloneable handle used by connections to queue write commands.
#[derive(Debug, Clone)]
pub struct AofSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl AofSender {
    /// Queues one command, waiting while the queue is full.
    pub async fn append(&self, args: &[Bytes]) -> Result<(), AofError> {
        self.tx
            .send(encode(args))
            .await
            .map_err(|_| AofError::Closed)
    }

    /// Waits for a free queue slot and holds it.
    ///
    /// Committing the permit never blocks, so it can happen while the
    /// command that produced the record still holds its locks.
    pub async fn reserve(&self) -> Result<AofPermit<'_>, AofError> {
        let permit = self.tx.reserve().await.map_err(|_| AofError::Closed)?;
        Ok(AofPermit { permit })
    }
}

/// A reserved slot in the log queue. Dropping it frees the slot.
#[derive(Debug)]
pub struct AofPermit<'a> {
    permit: mpsc::Permit<'a, Vec<u8>>,
}

impl AofPermit<'_> {
    /// Queues one command in the reserved slot.
    pub fn commit(self, args: &[Bytes]) {
        self.permit.send(encode(args));
    }
}

fn encode(args: &[Bytes]) -> Vec<u8> {
    RespValue::command(args.iter().cloned()).serialize()
}

async fn writer_loop(
    file: File,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<u64, std::io::Error> {
    let mut out = BufWriter::new(file);
    let mut written = 0u64;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                out.write_all(&frame).await?;
                written += 1;
                // Batch whatever else is already queued before flushing.
                while let Ok(frame) = rx.try_recv() {
                    out.write_all(&frame).await?;
                    written += 1;
                }
                out.flush().await?;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Append-only log writer received shutdown signal");
                    break;
                }
            }
        }
    }

    // Refuse new records, then drain the ones already accepted.
    rx.close();
    while let Some(frame) = rx.recv().await {
        out.write_all(&frame).await?;
        written += 1;
    }
    out.flush().await?;
    out.get_ref().sync_all().await?;
    Ok(written)
}

/// Replays the log at `path` through `handler`.
///
/// Malformed frames and commands that fail are logged and skipped. A
/// missing file is an empty log. Returns the number of commands applied.
pub async fn replay(path: impl AsRef<Path>, handler: &CommandHandler) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No append-only log found, starting empty");
            return Ok(0);
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to open append-only log {}", path.display()))
        }
    };

    let mut stream = RespStream::new(file);
    let mut applied = 0usize;
    let mut skipped = 0usize;

    while let Some(frame) = stream.next().await {
        let value = match frame {
            Ok(value) => value,
            Err(e) if e.is_fatal() => {
                return Err(e)
                    .with_context(|| format!("failed to read append-only log {}", path.display()))
            }
            Err(e) => {
                warn!(error = %e, offset = stream.bytes_read(), "Skipping malformed log entry");
                skipped += 1;
                continue;
            }
        };

        let Some(args) = value.into_command().filter(|args| !args.is_empty()) else {
            skipped += 1;
            continue;
        };
        let outcome = handler.dispatch(&args);
        if let RespValue::Error(msg) = &outcome.reply {
            warn!(error = %msg, "Log entry failed during replay");
            skipped += 1;
        } else {
            applied += 1;
        }
    }

    info!(
        path = %path.display(),
        applied,
        skipped,
        bytes = stream.bytes_read(),
        "Append-only log replayed"
    );
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandHandler;
    use crate::storage::StorageEngine;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    fn handler() -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::with_shards(16, 0)))
    }

    #[tokio::test]
    async fn test_append_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let writer = AofWriter::start(&path, 4).await.unwrap();
        let sender = writer.sender();
        for cmd in [
            &["SET", "a", "1"][..],
            &["RPUSH", "l", "x", "y"],
            &["INCR", "a"],
            &["DEL", "l"],
        ] {
            sender.append(&args(cmd)).await.unwrap();
        }
        assert_eq!(writer.shutdown().await.unwrap(), 4);

        let restored = handler();
        assert_eq!(replay(&path, &restored).await.unwrap(), 4);
        assert_eq!(
            restored.dispatch(&args(&["GET", "a"])).reply,
            RespValue::bulk_string("2")
        );
        assert_eq!(
            restored.dispatch(&args(&["EXISTS", "l"])).reply,
            RespValue::Integer(0)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_replay_to_live_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("order.aof");
        let writer = AofWriter::start(&path, 8).await.unwrap();
        let live = handler();

        let mut tasks = Vec::new();
        for worker in 0..8usize {
            let live = live.clone();
            let sender = writer.sender();
            tasks.push(tokio::spawn(async move {
                for i in 0..200usize {
                    let n = i.to_string();
                    let cmd = match (worker + i) % 4 {
                        0 => args(&["SET", "k", n.as_str()]),
                        1 => args(&["INCRBY", "k", "3"]),
                        2 => args(&["RPUSH", "l", n.as_str()]),
                        _ => args(&["LPOP", "l"]),
                    };
                    let permit = sender.reserve().await.unwrap();
                    live.dispatch_logged(&cmd, permit);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        writer.shutdown().await.unwrap();

        let restored = handler();
        replay(&path, &restored).await.unwrap();
        for query in [&["GET", "k"][..], &["LRANGE", "l", "0", "-1"]] {
            assert_eq!(
                restored.dispatch(&args(query)).reply,
                live.dispatch(&args(query)).reply
            );
        }
    }

    #[tokio::test]
    async fn test_dispatch_logged_skips_failed_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.aof");
        let writer = AofWriter::start(&path, 1).await.unwrap();
        let sender = writer.sender();
        let live = handler();

        for cmd in [&["SET", "s", "v"][..], &["LPUSH", "s", "x"], &["GET", "s"]] {
            let permit = sender.reserve().await.unwrap();
            live.dispatch_logged(&args(cmd), permit);
        }
        drop(sender);
        assert_eq!(writer.shutdown().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_after_shutdown_fails() {
        let dir = tempdir().unwrap();
        let writer = AofWriter::start(dir.path().join("closed.aof"), 1).await.unwrap();
        let sender = writer.sender();
        writer.shutdown().await.unwrap();
        assert!(matches!(
            sender.append(&args(&["SET", "k", "v"])).await,
            Err(AofError::Closed)
        ));
        assert!(matches!(sender.reserve().await, Err(AofError::Closed)));
    }

    #[tokio::test]
    async fn test_replay_missing_file() {
        let dir = tempdir().unwrap();
        let applied = replay(dir.path().join("nope.aof"), &handler()).await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn test_replay_skips_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.aof");
        let mut data = Vec::new();
        data.extend_from_slice(&RespValue::command(["SET", "a", "1"]).serialize());
        data.extend_from_slice(b"*2\r\n$3\r\nGET\r\n:5\n");
        data.extend_from_slice(&RespValue::command(["LPUSH", "a", "x"]).serialize());
        data.extend_from_slice(&RespValue::command(["SET", "b", "2"]).serialize());
        tokio::fs::write(&path, &data).await.unwrap();

        let restored = handler();
        assert_eq!(replay(&path, &restored).await.unwrap(), 2);
        assert_eq!(
            restored.dispatch(&args(&["GET", "b"])).reply,
            RespValue::bulk_string("2")
        );
    }
}
