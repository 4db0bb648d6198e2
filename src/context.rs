//! Client context
//!
//! Mount-wide collaborators shared by all inodes: configuration, the
//! remote channel, the cache buffer pool, the async retry queue and the
//! registry of inodes with cached data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::buffer_pool::BufferPool;
use crate::config::{ClientConfig, ConfigHandle};
use crate::error::Result;
use crate::inode::CachedInodeStore;
use crate::remote::RemoteIo;
use crate::retry::{AsyncRetryQueue, RetryWorker};

/// Access to the page cache of mapped files
///
/// Used to keep buffered I/O coherent with memory mappings.
pub trait PageCacheHooks: Send + Sync {
    /// Write back dirty pages of `ino` and wait for completion
    fn write_and_wait(&self, ino: u64) -> Result<()>;

    /// Drop cached pages of `ino`
    fn invalidate(&self, ino: u64);
}

/// Page cache hooks for mounts without a page cache
#[derive(Debug, Default)]
pub struct NoPageCache;

impl PageCacheHooks for NoPageCache {
    fn write_and_wait(&self, _ino: u64) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _ino: u64) {}
}

/// Shared state of one mount
pub struct ClientContext {
    config: ConfigHandle,
    remote: Arc<dyn RemoteIo>,
    page_cache: Arc<dyn PageCacheHooks>,
    cache_buffers: BufferPool,
    retry_queue: AsyncRetryQueue,
    cached_inodes: CachedInodeStore,
    epoch: Instant,
    next_client_fd: AtomicU64,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("cache_buffers", &self.cache_buffers)
            .field("cached_inodes", &self.cached_inodes.len())
            .finish()
    }
}

impl ClientContext {
    /// Create the context and the retry worker that serves its queue
    ///
    /// The worker must be spawned on a tokio runtime, e.g.
    /// `tokio::spawn(worker.run(shutdown_rx))`.
    pub fn new(config: ClientConfig, remote: Arc<dyn RemoteIo>) -> Result<(Arc<Self>, RetryWorker)> {
        Self::with_page_cache(config, remote, Arc::new(NoPageCache))
    }

    pub fn with_page_cache(
        mut config: ClientConfig,
        remote: Arc<dyn RemoteIo>,
        page_cache: Arc<dyn PageCacheHooks>,
    ) -> Result<(Arc<Self>, RetryWorker)> {
        config.validate_and_normalize()?;

        let cache_buffers = BufferPool::new(config.cache.buffer_size, config.cache.buffer_count);
        let (sender, receiver) = mpsc::channel(config.retry.queue_capacity);
        let config = ConfigHandle::new(config);
        let cached_inodes = CachedInodeStore::default();

        tracing::info!(
            buffer_size = cache_buffers.buf_size(),
            buffer_count = cache_buffers.capacity(),
            "Client I/O context initialized"
        );

        let worker = RetryWorker::new(
            receiver,
            remote.clone(),
            config.clone(),
            cached_inodes.clone(),
        );

        let ctx = Arc::new(Self {
            config,
            remote,
            page_cache,
            cache_buffers,
            retry_queue: AsyncRetryQueue::new(sender),
            cached_inodes,
            epoch: Instant::now(),
            next_client_fd: AtomicU64::new(1),
        });

        Ok((ctx, worker))
    }

    /// Configuration snapshot for the current operation
    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.current()
    }

    pub fn config_handle(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn remote(&self) -> &dyn RemoteIo {
        self.remote.as_ref()
    }

    pub fn page_cache(&self) -> &dyn PageCacheHooks {
        self.page_cache.as_ref()
    }

    pub fn cache_buffers(&self) -> &BufferPool {
        &self.cache_buffers
    }

    pub fn retry_queue(&self) -> &AsyncRetryQueue {
        &self.retry_queue
    }

    pub fn cached_inodes(&self) -> &CachedInodeStore {
        &self.cached_inodes
    }

    /// Monotonic nanoseconds since the context was created, never 0
    pub fn now_ticks(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64 + 1
    }

    /// Unique ID for an open file description
    pub(crate) fn next_client_fd(&self) -> u64 {
        self.next_client_fd.fetch_add(1, Ordering::Relaxed)
    }
}
