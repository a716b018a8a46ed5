//! Configuration loading for engage-sync.
//!
//! Configuration is loaded from a TOML file (default: `engage.toml`). Every
//! section and field is optional.
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/engage"
//!
//! [assets]
//! cdn_root = "https://cdn.example.com/assets/"
//! max_parallel_downloads = 4
//! digest_algorithm = "sha1"
//!
//! [events]
//! endpoint = "https://collect.example.com/v1/batch"
//! batch_max_events = 50
//! flush_interval_secs = 30
//!
//! [device]
//! user = "user-42"
//! app_version = "3.1.0"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engage_assets::{AssetSyncConfig, DigestAlgorithm};
use engage_core::{Backoff, BatchLimits};

use crate::dispatcher::{DeviceIdentity, DispatchConfig};
use crate::queue::QueueOptions;

/// Root configuration for engage-sync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// On-disk locations.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Asset download configuration.
    #[serde(default)]
    pub assets: AssetsConfig,
    /// Event queue and delivery configuration.
    #[serde(default)]
    pub events: EventsConfig,
    /// Identity sent with event batches.
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the asset cache and event log (default: `engage-data`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Asset download configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    /// Fallback URL prefix when a campaign payload has no `cdn_root`.
    #[serde(default)]
    pub cdn_root: String,
    /// Concurrent downloads (default: 4).
    #[serde(default = "default_max_parallel_downloads")]
    pub max_parallel_downloads: usize,
    /// Attempts per asset before giving up (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds (default: 500).
    #[serde(default = "default_asset_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Retry delay cap in milliseconds (default: 30000).
    #[serde(default = "default_asset_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Digest used in asset manifests (default: sha1).
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
    /// Fsync assets before they become visible (default: true).
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
}

/// Event queue and delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Batch collection URL, used by HTTP transports.
    #[serde(default)]
    pub endpoint: String,
    /// Maximum events per batch (default: 50).
    #[serde(default = "default_batch_max_events")]
    pub batch_max_events: usize,
    /// Maximum JSON bytes per batch (default: 256KB).
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: usize,
    /// Background flush period in seconds (default: 30).
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Queue depth that triggers an early flush (default: 20).
    #[serde(default = "default_flush_watermark")]
    pub flush_watermark: usize,
    /// Pending events kept before the oldest are evicted (default: 10000).
    #[serde(default = "default_max_queued_events")]
    pub max_queued_events: usize,
    /// Acknowledged records kept in the log before compaction (default: 1000).
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: usize,
    /// First backoff delay after a failed flush, in milliseconds (default: 1000).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds (default: 300000 = 5 minutes).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Identity sent with event batches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// Host application's user identifier.
    #[serde(default)]
    pub user: String,
    /// Host application version.
    #[serde(default)]
    pub app_version: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("engage-data")
}

fn default_max_parallel_downloads() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_asset_retry_base_ms() -> u64 {
    500
}

fn default_asset_retry_max_ms() -> u64 {
    30_000
}

fn default_sync_writes() -> bool {
    true
}

fn default_batch_max_events() -> usize {
    50
}

fn default_batch_max_bytes() -> usize {
    256 * 1024 // 256KB
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_flush_watermark() -> usize {
    20
}

fn default_max_queued_events() -> usize {
    10_000
}

fn default_compact_threshold() -> usize {
    1_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    5 * 60 * 1000 // 5 minutes
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            cdn_root: String::new(),
            max_parallel_downloads: default_max_parallel_downloads(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_asset_retry_base_ms(),
            retry_max_ms: default_asset_retry_max_ms(),
            digest_algorithm: DigestAlgorithm::default(),
            sync_writes: default_sync_writes(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            batch_max_events: default_batch_max_events(),
            batch_max_bytes: default_batch_max_bytes(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_watermark: default_flush_watermark(),
            max_queued_events: default_max_queued_events(),
            compact_threshold: default_compact_threshold(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reject values the sync core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.assets.max_parallel_downloads == 0, "assets.max_parallel_downloads must be at least 1"),
            (self.assets.max_attempts == 0, "assets.max_attempts must be at least 1"),
            (self.events.batch_max_events == 0, "events.batch_max_events must be at least 1"),
            (self.events.batch_max_bytes == 0, "events.batch_max_bytes must be at least 1"),
            (self.events.max_queued_events == 0, "events.max_queued_events must be at least 1"),
            (self.events.flush_interval_secs == 0, "events.flush_interval_secs must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}

pub(crate) const PUSH_TOKEN_FILE: &str = "push_token";

impl StorageConfig {
    /// Directory of the asset cache.
    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    /// Directory of the event log.
    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    /// File holding the last announced push token.
    pub fn push_token_file(&self) -> PathBuf {
        self.data_dir.join(PUSH_TOKEN_FILE)
    }
}

impl AssetsConfig {
    /// Settings for the asset sync manager.
    pub fn sync_config(&self) -> AssetSyncConfig {
        AssetSyncConfig {
            cdn_root: self.cdn_root.clone(),
            max_parallel_downloads: self.max_parallel_downloads,
            max_attempts: self.max_attempts,
            backoff: Backoff::new(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            )
            .with_jitter(Duration::from_millis(self.retry_base_ms / 2)),
            algorithm: self.digest_algorithm,
        }
    }
}

impl EventsConfig {
    /// Settings for the dispatcher.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            limits: BatchLimits::new(self.batch_max_events, self.batch_max_bytes),
            backoff: Backoff::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            )
            .with_jitter(Duration::from_millis(self.backoff_base_ms / 2)),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
        }
    }

    /// Sizing of the durable queue.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            max_queued_events: self.max_queued_events,
            compact_threshold: self.compact_threshold,
        }
    }
}

impl DeviceConfig {
    /// Identity attached to every batch.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            user: self.user.clone(),
            app_version: self.app_version.clone(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
