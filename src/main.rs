//! memkv server binary.
//!
//! Startup: parse flags, load and validate configuration, set up logging,
//! replay the append-only log, bind, then serve until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use memkv::{Config, Server};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of storage shards
    #[arg(short, long)]
    shards: Option<usize>,

    /// Path of the append-only file
    #[arg(long, conflicts_with = "no_aof")]
    aof: Option<PathBuf>,

    /// Run without the append-only file
    #[arg(long)]
    no_aof: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    /// File values first, then any flag given on the command line.
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(shards) = self.shards {
            config.shard_count = shards;
        }
        if let Some(path) = self.aof {
            config.appendonly = true;
            config.aof_path = path;
        }
        if self.no_aof {
            config.appendonly = false;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memkv={}", config.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        "Starting memkv v{} on {}",
        memkv::VERSION,
        config.bind_address()
    );
    if !config.appendonly {
        warn!("Append-only log disabled, data will not survive a restart");
    }

    let server = Server::from_config(&config).await?;

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    server.run(listener, shutdown).await?;
    info!("Server shutdown complete");
    Ok(())
}
