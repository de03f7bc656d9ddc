//! Server configuration, parsed from the command line.

use crate::storage::{StorageConfig, DEFAULT_MAX_KEYS};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// TideKV - an in-memory key-value server speaking RESP
#[derive(Parser, Debug, Clone)]
#[command(name = "tidekv", version, about)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of keys before least recently used keys are evicted
    #[arg(long, default_value_t = DEFAULT_MAX_KEYS)]
    pub max_keys: usize,

    /// Directory holding the snapshot file
    #[arg(long, default_value = "data")]
    pub dir: PathBuf,

    /// Snapshot file name inside --dir
    #[arg(long, default_value = "dump.tkv")]
    pub dbfilename: String,

    /// Seconds between periodic snapshots (0 disables them)
    #[arg(long, default_value_t = 60)]
    pub save_interval: u64,

    /// Run purely in memory: no snapshot is loaded or written
    #[arg(long)]
    pub no_persistence: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_keys: DEFAULT_MAX_KEYS,
            dir: PathBuf::from("data"),
            dbfilename: "dump.tkv".to_string(),
            save_interval: 60,
            no_persistence: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where the snapshot lives, or `None` when persistence is off.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.no_persistence).then(|| self.dir.join(&self.dbfilename))
    }

    /// Interval for the periodic snapshot task, if it should run at all.
    pub fn snapshot_interval(&self) -> Option<Duration> {
        if self.no_persistence || self.save_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.save_interval))
        }
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            max_keys: self.max_keys,
            snapshot_path: self.snapshot_path(),
        }
    }
}
