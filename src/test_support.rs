//! Shared test fixtures: an in-memory remote and context helpers

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::context::{ClientContext, PageCacheHooks};
use crate::entry::{EntryHandle, EntryInfo, EntryType, NodeOrGroup, ROOT_ENTRY_ID};
use crate::error::{Error, Result};
use crate::events::FileEvent;
use crate::inode::Inode;
use crate::remote::{Attributes, FsyncOptions, IoInfo, LockKind, OpenFlags, OpenResult, RemoteIo};
use crate::striping::StripePattern;

/// Remote operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MockOp {
    FetchRoot,
    Open,
    Close,
    Read,
    Write,
    Stat,
    Truncate,
    Fsync,
    LockEntry,
    LockRange,
    LockAppend,
    BumpVersion,
}

/// Remote calls in the order they were made
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoteCall {
    Open(OpenFlags),
    Close,
    Read { offset: u64, len: usize },
    Write { offset: u64, len: usize },
    Stat,
    Truncate { size: u64 },
    Fsync(FsyncOptions),
    LockEntry(LockKind),
    LockRange { kind: LockKind, start: u64, end: u64 },
    LockAppend(LockKind),
    BumpVersion,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CallCounts {
    pub fetch_root: usize,
    pub open: usize,
    pub close: usize,
    pub read: usize,
    pub write: usize,
    pub stat: usize,
    pub truncate: usize,
    pub fsync: usize,
    pub lock_entry: usize,
    pub lock_range: usize,
    pub lock_append: usize,
    pub bump_version: usize,
}

struct MockState {
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<String, String>,
    next_handle: u64,
    pattern: StripePattern,
    calls: CallCounts,
    log: Vec<RemoteCall>,
    events: Vec<FileEvent>,
    failures: HashMap<MockOp, VecDeque<Error>>,
    write_limit: Option<usize>,
    read_limits: VecDeque<usize>,
    first_writes: Vec<bool>,
}

/// In-memory metadata and storage servers
pub(crate) struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                files: HashMap::new(),
                handles: HashMap::new(),
                next_handle: 1,
                pattern: StripePattern::raid0(1024 * 1024, vec![1, 2]),
                calls: CallCounts::default(),
                log: Vec::new(),
                events: Vec::new(),
                failures: HashMap::new(),
                write_limit: None,
                read_limits: VecDeque::new(),
                first_writes: Vec::new(),
            }),
        })
    }

    pub fn set_file(&self, entry_id: &str, data: &[u8]) {
        self.state.lock().files.insert(entry_id.to_string(), data.to_vec());
    }

    pub fn file(&self, entry_id: &str) -> Vec<u8> {
        self.state.lock().files.get(entry_id).cloned().unwrap_or_default()
    }

    pub fn set_pattern(&self, pattern: StripePattern) {
        self.state.lock().pattern = pattern;
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls.clone()
    }

    pub fn log(&self) -> Vec<RemoteCall> {
        self.state.lock().log.clone()
    }

    /// First-write answers the storage side got, one per write
    pub fn first_writes(&self) -> Vec<bool> {
        self.state.lock().first_writes.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    pub fn events(&self) -> Vec<FileEvent> {
        self.state.lock().events.clone()
    }

    pub fn fail_next(&self, op: MockOp, err: Error) {
        self.state.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn fail_next_root_fetch(&self, err: Error) {
        self.fail_next(MockOp::FetchRoot, err);
    }

    /// Accept at most `limit` bytes on the next write
    pub fn limit_next_write(&self, limit: usize) {
        self.state.lock().write_limit = Some(limit);
    }

    /// Return at most `limit` bytes from one upcoming read; calls queue up
    pub fn limit_next_read(&self, limit: usize) {
        self.state.lock().read_limits.push_back(limit);
    }

    fn check(state: &mut MockState, op: MockOp) -> Result<()> {
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn file_for_handle<'a>(state: &'a mut MockState, io: &IoInfo) -> Result<&'a mut Vec<u8>> {
        let entry_id = state
            .handles
            .get(&*io.handle_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown handle {}", io.handle_id)))?;
        Ok(state.files.entry(entry_id).or_default())
    }
}

impl RemoteIo for MockRemote {
    fn fetch_root_entry_info(&self) -> Result<EntryInfo> {
        let mut state = self.state.lock();
        state.calls.fetch_root += 1;
        Self::check(&mut state, MockOp::FetchRoot)?;
        Ok(EntryInfo::new(
            NodeOrGroup::node(1),
            "",
            ROOT_ENTRY_ID,
            "",
            EntryType::Directory,
        ))
    }

    fn open(&self, entry: &EntryInfo, flags: OpenFlags, event: Option<FileEvent>) -> Result<OpenResult> {
        let mut state = self.state.lock();
        state.calls.open += 1;
        state.log.push(RemoteCall::Open(flags));
        Self::check(&mut state, MockOp::Open)?;

        let handle_id = format!("H{}", state.next_handle);
        state.next_handle += 1;
        state.handles.insert(handle_id.clone(), entry.entry_id.clone());

        let file = state.files.entry(entry.entry_id.clone()).or_default();
        if flags.contains(OpenFlags::TRUNC) {
            file.clear();
        }

        state.events.extend(event);
        Ok(OpenResult {
            handle_id,
            pattern: state.pattern.clone(),
            version: state.next_handle,
        })
    }

    fn close(&self, _entry: &EntryInfo, _io: &IoInfo, event: Option<FileEvent>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.close += 1;
        state.log.push(RemoteCall::Close);
        Self::check(&mut state, MockOp::Close)?;
        state.events.extend(event);
        Ok(())
    }

    fn read(&self, io: &IoInfo, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.calls.read += 1;
        state.log.push(RemoteCall::Read {
            offset,
            len: buf.len(),
        });
        Self::check(&mut state, MockOp::Read)?;

        io.note_target_access(offset, false);
        let limit = state.read_limits.pop_front().unwrap_or(usize::MAX);
        let file = Self::file_for_handle(&mut state, io)?;
        let start = (offset as usize).min(file.len());
        let n = buf.len().min(file.len() - start).min(limit);
        buf[..n].copy_from_slice(&file[start..start + n]);
        Ok(n)
    }

    fn write(&self, io: &IoInfo, offset: u64, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.calls.write += 1;
        state.log.push(RemoteCall::Write {
            offset,
            len: data.len(),
        });
        Self::check(&mut state, MockOp::Write)?;

        let accepted = match state.write_limit.take() {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };

        let first_write = io.note_target_access(offset, true);
        state.first_writes.push(first_write);
        let file = Self::file_for_handle(&mut state, io)?;
        let start = offset as usize;
        if file.len() < start + accepted {
            file.resize(start + accepted, 0);
        }
        file[start..start + accepted].copy_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn stat(&self, entry: &EntryInfo) -> Result<Attributes> {
        let mut state = self.state.lock();
        state.calls.stat += 1;
        state.log.push(RemoteCall::Stat);
        Self::check(&mut state, MockOp::Stat)?;

        let size = state.files.get(&entry.entry_id).map_or(0, |f| f.len() as u64);
        Ok(Attributes {
            size,
            blocks: size.div_ceil(512),
            mode: 0o100644,
            nlink: 1,
            ..Attributes::default()
        })
    }

    fn truncate(&self, entry: &EntryInfo, size: u64, event: Option<FileEvent>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.truncate += 1;
        state.log.push(RemoteCall::Truncate { size });
        Self::check(&mut state, MockOp::Truncate)?;

        state
            .files
            .entry(entry.entry_id.clone())
            .or_default()
            .resize(size as usize, 0);
        state.events.extend(event);
        Ok(())
    }

    fn fsync(&self, _io: &IoInfo, options: FsyncOptions) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.fsync += 1;
        state.log.push(RemoteCall::Fsync(options));
        Self::check(&mut state, MockOp::Fsync)
    }

    fn lock_entry(
        &self,
        _entry: &EntryInfo,
        _io: &IoInfo,
        _client_fd: u64,
        _owner_pid: i32,
        kind: LockKind,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.lock_entry += 1;
        state.log.push(RemoteCall::LockEntry(kind));
        Self::check(&mut state, MockOp::LockEntry)
    }

    fn lock_range(
        &self,
        _entry: &EntryInfo,
        _io: &IoInfo,
        _owner_pid: i32,
        kind: LockKind,
        start: u64,
        end: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.lock_range += 1;
        state.log.push(RemoteCall::LockRange { kind, start, end });
        Self::check(&mut state, MockOp::LockRange)
    }

    fn lock_append(&self, _entry: &EntryInfo, _io: &IoInfo, kind: LockKind) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.lock_append += 1;
        state.log.push(RemoteCall::LockAppend(kind));
        Self::check(&mut state, MockOp::LockAppend)
    }

    fn bump_file_version(&self, _entry: &EntryInfo, event: Option<FileEvent>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.bump_version += 1;
        state.log.push(RemoteCall::BumpVersion);
        Self::check(&mut state, MockOp::BumpVersion)?;
        state.events.extend(event);
        Ok(())
    }
}

/// Page cache hooks that count their invocations
#[derive(Debug, Default)]
pub(crate) struct RecordingPageCache {
    pub writes: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl PageCacheHooks for RecordingPageCache {
    fn write_and_wait(&self, _ino: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn invalidate(&self, _ino: u64) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Context whose retry worker is dropped; delayed ops are discarded
pub(crate) fn test_context(config: ClientConfig, remote: Arc<MockRemote>) -> Arc<ClientContext> {
    let (ctx, _worker) = ClientContext::new(config, remote).unwrap();
    ctx
}

/// Regular file inode for `entry_id`
pub(crate) fn file_inode(ctx: &Arc<ClientContext>, entry_id: &str) -> Arc<Inode> {
    let info = EntryInfo::new(NodeOrGroup::node(1), "root", entry_id, entry_id, EntryType::Regular);
    Inode::new(ctx, EntryHandle::new(info), EntryType::Regular)
}
