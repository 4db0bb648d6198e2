//! Content cache buffer pool
//!
//! A bounded set of equally sized buffers shared by all inodes of a mount.
//! Buffers are allocated lazily up to the pool capacity and go back to the
//! free list when the [`PooledBuffer`] guard is dropped, so every acquired
//! buffer is returned exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct PoolInner {
    buf_size: usize,
    capacity: usize,
    /// Free buffers plus number of buffers allocated so far
    state: Mutex<PoolState>,
    available: Condvar,
    outstanding: AtomicUsize,
}

struct PoolState {
    free: Vec<Box<[u8]>>,
    allocated: usize,
}

/// Bounded pool of fixed-size buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buf_size", &self.inner.buf_size)
            .field("capacity", &self.inner.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl BufferPool {
    /// Create a pool of `capacity` buffers with `buf_size` bytes each
    pub fn new(buf_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buf_size,
                capacity,
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    allocated: 0,
                }),
                available: Condvar::new(),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of buffers currently handed out
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Get a buffer without blocking; `None` if the pool is exhausted
    pub fn instant_buf(&self) -> Option<PooledBuffer> {
        let mut state = self.inner.state.lock();
        self.take_locked(&mut state)
    }

    /// Get a buffer, blocking until one is returned to the pool
    pub fn wait_buf(&self) -> PooledBuffer {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(buf) = self.take_locked(&mut state) {
                return buf;
            }
            self.inner.available.wait(&mut state);
        }
    }

    /// Like [`BufferPool::wait_buf`] but gives up after `timeout`
    pub fn wait_buf_timeout(&self, timeout: Duration) -> Option<PooledBuffer> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(buf) = self.take_locked(&mut state) {
                return Some(buf);
            }
            if self.inner.available.wait_for(&mut state, timeout).timed_out() {
                return self.take_locked(&mut state);
            }
        }
    }

    fn take_locked(&self, state: &mut PoolState) -> Option<PooledBuffer> {
        let data = match state.free.pop() {
            Some(data) => data,
            None if state.allocated < self.inner.capacity => {
                state.allocated += 1;
                vec![0u8; self.inner.buf_size].into_boxed_slice()
            }
            None => return None,
        };

        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        Some(PooledBuffer {
            data: Some(data),
            pool: self.inner.clone(),
        })
    }
}

/// A buffer borrowed from a [`BufferPool`]
pub struct PooledBuffer {
    data: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer").field("len", &self.len()).finish()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let mut state = self.pool.state.lock();
            state.free.push(data);
            self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
            drop(state);
            self.pool.available.notify_one();
        }
    }
}
