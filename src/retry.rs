//! Async retry queue
//!
//! Closes and unlocks that failed with a transient error are queued here
//! and retried in the background. Callers only enqueue; they never wait
//! for or observe the outcome. The same worker also flushes cached writes
//! of idle inodes periodically.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::ConfigHandle;
use crate::entry::EntryInfo;
use crate::error::{Error, Result};
use crate::events::FileEvent;
use crate::inode::CachedInodeStore;
use crate::remote::{IoInfo, LockKind, RemoteIo};

/// A remote operation that must eventually succeed on the server
#[derive(Debug, Clone)]
pub enum DelayedOp {
    Close {
        entry: EntryInfo,
        io: IoInfo,
        event: Option<FileEvent>,
    },
    EntryUnlock {
        entry: EntryInfo,
        io: IoInfo,
        client_fd: u64,
        owner_pid: i32,
    },
    RangeUnlock {
        entry: EntryInfo,
        io: IoInfo,
        owner_pid: i32,
    },
}

impl DelayedOp {
    pub fn kind(&self) -> &'static str {
        match self {
            DelayedOp::Close { .. } => "close",
            DelayedOp::EntryUnlock { .. } => "entry unlock",
            DelayedOp::RangeUnlock { .. } => "range unlock",
        }
    }

    pub fn entry(&self) -> &EntryInfo {
        match self {
            DelayedOp::Close { entry, .. }
            | DelayedOp::EntryUnlock { entry, .. }
            | DelayedOp::RangeUnlock { entry, .. } => entry,
        }
    }

    fn execute(&self, remote: &dyn RemoteIo) -> Result<()> {
        match self {
            DelayedOp::Close { entry, io, event } => remote.close(entry, io, event.clone()),
            DelayedOp::EntryUnlock {
                entry,
                io,
                client_fd,
                owner_pid,
            } => remote.lock_entry(entry, io, *client_fd, *owner_pid, LockKind::Unlock),
            DelayedOp::RangeUnlock {
                entry,
                io,
                owner_pid,
            } => remote.lock_range(entry, io, *owner_pid, LockKind::Unlock, 0, u64::MAX),
        }
    }
}

/// Sending side of the retry queue
///
/// Enqueueing never blocks. If the queue is full or the worker is gone,
/// the operation is logged and dropped.
#[derive(Debug, Clone)]
pub struct AsyncRetryQueue {
    sender: mpsc::Sender<DelayedOp>,
}

impl AsyncRetryQueue {
    pub(crate) fn new(sender: mpsc::Sender<DelayedOp>) -> Self {
        Self { sender }
    }

    pub fn add_close(&self, entry: EntryInfo, io: IoInfo, event: Option<FileEvent>) {
        self.enqueue(DelayedOp::Close { entry, io, event });
    }

    pub fn add_entry_unlock(&self, entry: EntryInfo, io: IoInfo, client_fd: u64, owner_pid: i32) {
        self.enqueue(DelayedOp::EntryUnlock {
            entry,
            io,
            client_fd,
            owner_pid,
        });
    }

    pub fn add_range_unlock(&self, entry: EntryInfo, io: IoInfo, owner_pid: i32) {
        self.enqueue(DelayedOp::RangeUnlock {
            entry,
            io,
            owner_pid,
        });
    }

    fn enqueue(&self, op: DelayedOp) {
        match self.sender.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(op)) => tracing::warn!(
                entry_id = %op.entry().entry_id,
                "Retry queue full, dropping delayed {}",
                op.kind()
            ),
            Err(TrySendError::Closed(op)) => tracing::warn!(
                entry_id = %op.entry().entry_id,
                "Retry worker stopped, dropping delayed {}",
                op.kind()
            ),
        }
    }
}

#[derive(Debug)]
struct PendingOp {
    op: DelayedOp,
    attempts: u32,
}

/// Background task retrying delayed operations
pub struct RetryWorker {
    receiver: mpsc::Receiver<DelayedOp>,
    remote: Arc<dyn RemoteIo>,
    config: ConfigHandle,
    cached_inodes: CachedInodeStore,
    pending: Vec<PendingOp>,
}

impl RetryWorker {
    pub(crate) fn new(
        receiver: mpsc::Receiver<DelayedOp>,
        remote: Arc<dyn RemoteIo>,
        config: ConfigHandle,
        cached_inodes: CachedInodeStore,
    ) -> Self {
        Self {
            receiver,
            remote,
            config,
            cached_inodes,
            pending: Vec::new(),
        }
    }

    /// Operations waiting for the next retry round
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Move newly queued operations into the pending list
    pub fn collect_queued(&mut self) -> usize {
        let mut collected = 0;
        while let Ok(op) = self.receiver.try_recv() {
            self.pending.push(PendingOp { op, attempts: 0 });
            collected += 1;
        }
        collected
    }

    /// Run one retry round over all pending operations
    ///
    /// Only communication errors are retried again; any other outcome
    /// removes the operation. Returns the number still pending.
    pub async fn retry_pending(&mut self) -> usize {
        let max_attempts = self.config.current().retry.max_attempts;
        let round = std::mem::take(&mut self.pending);

        for mut pending in round {
            let remote = self.remote.clone();
            let op = pending.op.clone();
            let result = match tokio::task::spawn_blocking(move || op.execute(remote.as_ref())).await {
                Ok(result) => result,
                Err(e) => Err(Error::Internal(format!("retry task failed: {}", e))),
            };

            pending.attempts += 1;
            let entry_id = pending.op.entry().entry_id.clone();
            let kind = pending.op.kind();

            match result {
                Ok(()) => {
                    tracing::info!(%entry_id, attempts = pending.attempts, "Delayed {} succeeded", kind);
                }
                Err(Error::Communication(msg)) => {
                    if max_attempts > 0 && pending.attempts >= max_attempts {
                        tracing::warn!(
                            %entry_id,
                            attempts = pending.attempts,
                            "Giving up on delayed {}: {}",
                            kind,
                            msg
                        );
                    } else {
                        tracing::debug!(%entry_id, attempts = pending.attempts, "Delayed {} still failing: {}", kind, msg);
                        self.pending.push(pending);
                    }
                }
                Err(e) => {
                    tracing::warn!(%entry_id, "Delayed {} failed, dropping it: {}", kind, e);
                }
            }
        }

        self.pending.len()
    }

    async fn flush_cached_inodes(&self) {
        let store = self.cached_inodes.clone();
        match tokio::task::spawn_blocking(move || store.flush_all_no_wait()).await {
            Ok(0) => {}
            Ok(flushed) => tracing::trace!(flushed, "Background cache flush"),
            Err(e) => tracing::warn!("Background cache flush task failed: {}", e),
        }
    }

    /// Serve the queue until shutdown is signalled or all senders are gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let config = self.config.current();
        let retry_interval = config.retry_interval();
        let flush_interval = config.flush_interval();

        let mut retry_tick = interval_at(Instant::now() + retry_interval, retry_interval);
        retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush_tick = interval_at(Instant::now() + flush_interval, flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(?retry_interval, ?flush_interval, "Retry worker started");

        loop {
            tokio::select! {
                op = self.receiver.recv() => {
                    match op {
                        Some(op) => {
                            tracing::debug!(entry_id = %op.entry().entry_id, "Queued delayed {}", op.kind());
                            self.pending.push(PendingOp { op, attempts: 0 });
                        }
                        None => {
                            self.retry_pending().await;
                            break;
                        }
                    }
                }
                _ = retry_tick.tick() => {
                    if !self.pending.is_empty() {
                        self.retry_pending().await;
                    }
                }
                _ = flush_tick.tick() => {
                    self.flush_cached_inodes().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !self.pending.is_empty() {
            tracing::warn!(pending = self.pending.len(), "Retry worker stopping with undelivered operations");
        }
        tracing::debug!("Retry worker stopped");
    }
}
