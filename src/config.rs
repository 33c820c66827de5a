use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::persistence::DEFAULT_QUEUE_CAPACITY;
use crate::storage::DEFAULT_SHARDS;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Number of shards in the primary store and the TTL index
    pub shard_count: usize,

    /// Number of key lock stripes (0 = twice the shard count)
    pub lock_stripes: usize,

    /// Log every successful write to the append-only file
    pub appendonly: bool,

    /// Path of the append-only file
    pub aof_path: PathBuf,

    /// Records that may wait for the log writer before writers block
    pub aof_queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            shard_count: DEFAULT_SHARDS,
            lock_stripes: 0,
            appendonly: true,
            aof_path: PathBuf::from("appendonly.aof"),
            aof_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing fields take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be > 0");
        }

        if self.shard_count == 0 {
            anyhow::bail!("shard_count must be > 0");
        }

        if self.appendonly && self.aof_queue_capacity == 0 {
            anyhow::bail!("aof_queue_capacity must be > 0");
        }

        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("unknown log_level '{}'", self.log_level);
        }

        Ok(())
    }

    /// Returns the bind address as `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
