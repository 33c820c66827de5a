//! Accept loop and startup sequence.

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::persistence::{self, AofWriter};
use crate::storage::StorageEngine;

/// A configured server, ready to accept connections.
#[derive(Debug)]
pub struct Server {
    handler: CommandHandler,
    aof: Option<AofWriter>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    pub fn new(handler: CommandHandler, aof: Option<AofWriter>) -> Self {
        Self {
            handler,
            aof,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Builds the storage engine, replays the append-only log and opens it
    /// for writing, in that order.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let storage = Arc::new(StorageEngine::with_shards(
            config.shard_count,
            config.lock_stripes,
        ));
        info!(
            shards = storage.data().shard_count(),
            stripes = storage.locks().stripe_count(),
            "Storage engine initialized"
        );
        let handler = CommandHandler::new(storage);

        let aof = if config.appendonly {
            let applied = persistence::replay(&config.aof_path, &handler).await?;
            if applied > 0 {
                info!(commands = applied, keys = handler.storage().len(), "Database restored");
            }
            let writer = AofWriter::start(&config.aof_path, config.aof_queue_capacity)
                .await
                .with_context(|| {
                    format!(
                        "failed to open append-only log {}",
                        config.aof_path.display()
                    )
                })?;
            Some(writer)
        } else {
            None
        };

        Ok(Self::new(handler, aof))
    }

    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Accepts connections until `shutdown` resolves, then drains the
    /// append-only log.
    ///
    /// Each connection runs in its own task. A panicking connection is
    /// logged and does not affect the others.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let sender = self.aof.as_ref().map(AofWriter::sender);

        tokio::select! {
            _ = accept_loop(&listener, &self.handler, sender, &self.stats) => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }

        if let Some(aof) = self.aof {
            aof.shutdown().await?;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: &TcpListener,
    handler: &CommandHandler,
    aof: Option<persistence::AofSender>,
    stats: &Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let task = tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    aof.clone(),
                    Arc::clone(stats),
                ));
                tokio::spawn(async move {
                    if let Err(e) = task.await {
                        if e.is_panic() {
                            error!(client = %addr, "Connection task panicked");
                        }
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
