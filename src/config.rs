//! Configuration for EmberKV
//!
//! Centralized configuration with sensible defaults. Everything here is
//! fixed at [`Engine::open`](crate::Engine::open); there is no hot reload.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, Result};

/// Main configuration for an EmberKV instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every segment file.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment_000001.log   (written by put/delete)
    ///     ├── compact_000004.log   (written by compaction)
    ///     └── segment_000005.log   (active)
    pub data_dir: PathBuf,

    /// Active segment is rotated once its size reaches this many bytes
    pub segment_size_limit: u64,

    /// How often appends are fsynced
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Period of the background compaction worker (`None` disables it)
    pub compaction_interval: Option<Duration>,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// fsync after every append (durable before put/delete returns)
    #[default]
    EveryWrite,

    /// fsync after N unsynced appends (balanced durability/performance)
    EveryNWrites { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./emberkv_data"),
            segment_size_limit: 64 * 1024 * 1024, // 64 MB
            sync_strategy: SyncStrategy::default(),
            compaction_interval: Some(Duration::from_secs(2)),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(EmberError::Config("data_dir must not be empty".to_string()));
        }
        if self.segment_size_limit == 0 {
            return Err(EmberError::Config(
                "segment_size_limit must be greater than zero".to_string(),
            ));
        }
        if let SyncStrategy::EveryNWrites { count: 0 } = self.sync_strategy {
            return Err(EmberError::Config(
                "EveryNWrites count must be greater than zero".to_string(),
            ));
        }
        if let Some(interval) = self.compaction_interval {
            if interval.is_zero() {
                return Err(EmberError::Config(
                    "compaction_interval must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn segment_size_limit(mut self, bytes: u64) -> Self {
        self.config.segment_size_limit = bytes;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the background compaction period
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.config.compaction_interval = Some(interval);
        self
    }

    /// Run compaction only when [`Engine::compact`](crate::Engine::compact) is called
    pub fn disable_background_compaction(mut self) -> Self {
        self.config.compaction_interval = None;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
