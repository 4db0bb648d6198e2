//! Client Configuration
//!
//! Tunables for the file cache, global locking, sync-on-close behaviour,
//! file event logging and the delayed retry worker. The core never keeps a
//! configuration snapshot beyond a single operation, so a [`ConfigHandle`]
//! can be swapped at runtime.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::events::EventLogMask;
use crate::inode::InodeIdStyle;

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Content cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Global (cluster-wide) locking
    #[serde(default)]
    pub locking: LockingConfig,

    /// Sync behaviour on flush/close
    #[serde(default)]
    pub sync: SyncConfig,

    /// File event logging
    #[serde(default)]
    pub events: EventsConfig,

    /// Inode numbering
    #[serde(default)]
    pub inode: InodeConfig,

    /// Delayed close/unlock retries and background flushing
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which caching mode regular files use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCacheType {
    /// Every read and write goes straight to the storage targets
    None,
    /// Single-slot read-ahead / write-combine buffer per inode
    Buffered,
    /// Page cache based I/O
    Paged,
    /// Native page cache with direct I/O fallback
    Native,
}

/// Content cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_file_cache_type")]
    pub file_cache_type: FileCacheType,

    /// Size of a single cache buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Number of cache buffers in the pool (0 = auto)
    #[serde(default)]
    pub buffer_count: usize,

    /// Attribute cache validity for directories
    #[serde(default = "default_dir_validity_ms")]
    pub dir_subentry_validity_ms: u64,

    /// Attribute cache validity for files (0 = always refresh)
    #[serde(default)]
    pub file_subentry_validity_ms: u64,

    /// Keep buffered and mmap'ed views coherent
    #[serde(default = "default_true")]
    pub coherent_buffers: bool,

    /// Read-ahead length for the first read at offset 0
    #[serde(default = "default_slow_start_read_len")]
    pub slow_start_read_len: usize,
}

/// Global locking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Forward flock/fcntl locks to the metadata server
    #[serde(default)]
    pub use_global_file_locks: bool,

    /// Serialize appends across clients with a server-side append lock
    #[serde(default)]
    pub use_global_append_locks: bool,

    /// Allow O_APPEND writes to go through the content cache
    #[serde(default = "default_true")]
    pub use_buffered_append: bool,
}

/// Sync behaviour on flush and close
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Forward fsync to the storage targets
    #[serde(default = "default_true")]
    pub remote_fsync: bool,

    /// Sync storage targets on every close
    #[serde(default)]
    pub sync_on_close: bool,

    /// Check the storage session on close
    #[serde(default)]
    pub session_check_on_close: bool,
}

/// File event logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Which events are attached to remote calls
    #[serde(default = "EventLogMask::empty")]
    pub log_mask: EventLogMask,
}

/// Inode numbering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InodeConfig {
    #[serde(default)]
    pub id_style: InodeIdStyle,
}

/// Delayed retry worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Interval between retry rounds
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,

    /// Maximum number of queued delayed operations
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Give up after this many failed attempts (0 = never)
    #[serde(default)]
    pub max_attempts: u32,

    /// Interval between background cache flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_file_cache_type() -> FileCacheType {
    FileCacheType::Buffered
}

fn default_buffer_size() -> usize {
    512 * 1024
}

fn default_dir_validity_ms() -> u64 {
    1000
}

fn default_slow_start_read_len() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

fn default_retry_interval_ms() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_cache_type: default_file_cache_type(),
            buffer_size: default_buffer_size(),
            buffer_count: 0,
            dir_subentry_validity_ms: default_dir_validity_ms(),
            file_subentry_validity_ms: 0,
            coherent_buffers: true,
            slow_start_read_len: default_slow_start_read_len(),
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            use_global_file_locks: false,
            use_global_append_locks: false,
            use_buffered_append: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_fsync: true,
            sync_on_close: false,
            session_check_on_close: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            queue_capacity: default_queue_capacity(),
            max_attempts: 0,
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let mut config: ClientConfig = toml::from_str(content)?;
        config.validate_and_normalize()?;
        Ok(config)
    }

    /// Validate the configuration and derive implicit values
    pub fn validate_and_normalize(&mut self) -> crate::Result<()> {
        if self.cache.buffer_size == 0 {
            return Err(crate::Error::Config("cache.buffer_size cannot be 0".into()));
        }

        if self.retry.queue_capacity == 0 {
            return Err(crate::Error::Config("retry.queue_capacity cannot be 0".into()));
        }

        if self.retry.interval_ms == 0 {
            return Err(crate::Error::Config("retry.interval_ms cannot be 0".into()));
        }

        if !self.locking.use_global_append_locks && self.locking.use_buffered_append {
            tracing::debug!("Buffered append requires global append locks, disabling it");
            self.locking.use_buffered_append = false;
        }

        if self.cache.buffer_count == 0 {
            self.cache.buffer_count = auto_buffer_count();
        }

        Ok(())
    }

    /// Whether the buffered content cache is active at all
    pub fn buffered_cache_enabled(&self) -> bool {
        self.cache.file_cache_type == FileCacheType::Buffered
    }

    /// Whether page cache based I/O is active
    pub fn paged_io_enabled(&self) -> bool {
        matches!(
            self.cache.file_cache_type,
            FileCacheType::Paged | FileCacheType::Native
        )
    }

    /// Get the retry interval as Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry.interval_ms)
    }

    /// Get the background flush interval as Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.retry.flush_interval_ms.max(1))
    }
}

/// Number of cache buffers when none is configured: four per core, at least four
pub fn auto_buffer_count() -> usize {
    let sys = System::new_all();
    let cores = sys.cpus().len().max(1);
    (cores * 4).max(4)
}

/// Shared, swappable configuration
///
/// Operations call [`ConfigHandle::current`] once and use that snapshot
/// for the rest of the call.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<ClientConfig>>>,
}

impl ConfigHandle {
    /// Wrap an already validated configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Snapshot of the current configuration
    pub fn current(&self) -> Arc<ClientConfig> {
        self.inner.read().clone()
    }

    /// Replace the configuration; calls already in flight keep their snapshot
    pub fn replace(&self, mut config: ClientConfig) -> crate::Result<()> {
        config.validate_and_normalize()?;
        *self.inner.write() = Arc::new(config);
        tracing::info!("Client configuration reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_str("").unwrap();
        assert_eq!(config.cache.file_cache_type, FileCacheType::Buffered);
        assert_eq!(config.cache.buffer_size, 524288);
        assert!(config.cache.buffer_count >= 4);
        assert_eq!(config.cache.dir_subentry_validity_ms, 1000);
        assert_eq!(config.cache.file_subentry_validity_ms, 0);
        assert!(config.cache.coherent_buffers);
        assert!(config.sync.remote_fsync);
        assert_eq!(config.retry.interval_ms, 60_000);
        assert!(config.events.log_mask.is_empty());
    }

    #[test]
    fn test_buffered_append_needs_global_append_locks() {
        let config = ClientConfig::from_str(
            r#"
[locking]
use_buffered_append = true
"#,
        )
        .unwrap();
        assert!(!config.locking.use_buffered_append);

        let config = ClientConfig::from_str(
            r#"
[locking]
use_global_append_locks = true
use_buffered_append = true
"#,
        )
        .unwrap();
        assert!(config.locking.use_buffered_append);
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[cache]
file_cache_type = "none"
buffer_size = 4096
buffer_count = 2

[events]
log_mask = "FLUSH | CLOSE"

[inode]
id_style = "hash32"

[retry]
interval_ms = 500
max_attempts = 3
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache.file_cache_type, FileCacheType::None);
        assert_eq!(config.cache.buffer_count, 2);
        assert!(config.events.log_mask.contains(EventLogMask::FLUSH));
        assert!(config.events.log_mask.contains(EventLogMask::CLOSE));
        assert!(!config.events.log_mask.contains(EventLogMask::READ));
        assert_eq!(config.inode.id_style, InodeIdStyle::Hash32);
        assert_eq!(config.retry_interval(), Duration::from_millis(500));
        assert!(!config.buffered_cache_enabled());
    }

    #[test]
    fn test_invalid_config() {
        let err = ClientConfig::from_str("[cache]\nbuffer_size = 0\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        let err = ClientConfig::from_str("[cache]\nbuffer_size = \"big\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_handle_replace() {
        let handle = ConfigHandle::new(ClientConfig::from_str("").unwrap());
        let before = handle.current();

        let mut next = ClientConfig::default();
        next.cache.file_cache_type = FileCacheType::None;
        handle.replace(next).unwrap();

        assert_eq!(before.cache.file_cache_type, FileCacheType::Buffered);
        assert_eq!(handle.current().cache.file_cache_type, FileCacheType::None);
    }
}
