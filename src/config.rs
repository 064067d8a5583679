//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - relata.toml (base configuration)
//! - relata.local.toml (git-ignored local overrides)
//! - Environment variables (RELATA_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # relata.toml
//! [server]
//! threads = 8
//! keep_alive_ms = 5000
//!
//! [volume]
//! sync_interval_secs = 30
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RELATA_SERVER__THREADS=16
//! RELATA_LOGGING__LEVEL=debug
//! ```
//!
//! Role-specific required arguments (ports, directories, the program
//! source, the coordinator address) come from the CLI, not from here.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Executor front-end tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Number of processor workers handling requests concurrently
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// How long to keep an idle client connection alive
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// Waiter idle sleep once the whole queue was walked without progress
    #[serde(default = "default_poll_sleep_ms")]
    pub poll_sleep_ms: u64,

    /// How long a worker waits for its processor to attach before
    /// retrying
    #[serde(default = "default_proc_wait_secs")]
    pub proc_wait_secs: u64,
}

/// Volume tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Seconds between reconciliation rounds against the coordinator
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_threads() -> usize { 8 }
fn default_keep_alive_ms() -> u64 { 5000 }
fn default_poll_sleep_ms() -> u64 { 10 }
fn default_proc_wait_secs() -> u64 { 5 }
fn default_sync_interval_secs() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from the default locations
    ///
    /// Merges in order:
    /// 1. relata.toml (base configuration)
    /// 2. relata.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (RELATA_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("relata.toml"))
            .merge(Toml::file("relata.local.toml"))
            .merge(Env::prefixed("RELATA_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            volume: VolumeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            threads: default_threads(),
            keep_alive_ms: default_keep_alive_ms(),
            poll_sleep_ms: default_poll_sleep_ms(),
            proc_wait_secs: default_proc_wait_secs(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        VolumeConfig { sync_interval_secs: default_sync_interval_secs() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level() }
    }
}
