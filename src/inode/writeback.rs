//! Dirty page write-back
//!
//! Page cache hooks report dirtied pages through [`Inode::note_page_write`]
//! and hand them back via [`Inode::write_back_pages`]. Pages are grouped
//! into contiguous runs inside one stripe chunk; each run is written by its
//! own worker thread and the call returns once all workers are done.

use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::remote::{IoInfo, OpenFlags};
use crate::striping::StripePattern;

/// A dirty page handed over for write-back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyPage {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Contiguous pages sent in one remote write
#[derive(Debug, PartialEq, Eq)]
struct PageRun {
    offset: u64,
    data: Vec<u8>,
    pages: u64,
}

impl PageRun {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Group pages into runs that are contiguous and stay within one chunk
fn group_pages(pattern: &StripePattern, mut pages: Vec<DirtyPage>) -> Vec<PageRun> {
    pages.sort_by_key(|p| p.offset);

    let mut runs: Vec<PageRun> = Vec::new();
    for page in pages {
        if page.data.is_empty() {
            continue;
        }

        if let Some(run) = runs.last_mut() {
            let same_chunk = pattern.chunk_start(run.offset) == pattern.chunk_start(page.offset)
                && pattern.chunk_end(page.offset) >= page.offset + page.data.len() as u64 - 1;

            if run.end() == page.offset && same_chunk {
                run.data.extend_from_slice(&page.data);
                run.pages += 1;
                continue;
            }
        }

        runs.push(PageRun {
            offset: page.offset,
            data: page.data,
            pages: 1,
        });
    }

    runs
}

impl Inode {
    /// A buffered page write ended at `end`
    pub fn note_page_write(&self, end: u64) {
        self.size.add_dirty_pages(1);
        self.size.extend_local(end, self.ctx.now_ticks(), true);
    }

    /// Write dirty pages to storage, returning the number of bytes written
    pub fn write_back_pages(&self, pages: Vec<DirtyPage>) -> Result<usize> {
        if pages.is_empty() {
            return Ok(0);
        }

        let guard = self.acquire_handle(OpenFlags::WRITE, true)?;
        let io = guard.io();
        let runs = group_pages(&io.pattern, pages);

        tracing::debug!(ino = self.ino, runs = runs.len(), "Writing back dirty pages");

        let results: Vec<Result<usize>> = std::thread::scope(|scope| {
            let workers: Vec<_> = runs
                .iter()
                .map(|run| scope.spawn(move || self.write_back_run(io, run)))
                .collect();

            workers
                .into_iter()
                .map(|w| {
                    w.join()
                        .unwrap_or_else(|_| Err(Error::Internal("write-back worker panicked".into())))
                })
                .collect()
        });

        let mut written = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(n) => written += n,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                tracing::warn!(ino = self.ino, written, "Page write-back failed: {}", e);
                Err(e)
            }
            None => Ok(written),
        }
    }

    fn write_back_run(&self, io: &IoInfo, run: &PageRun) -> Result<usize> {
        self.size.note_write_back_start();

        let result = self.remote().write(io, run.offset, &run.data);

        self.size.note_write_back_done(self.ctx.now_ticks(), run.pages);

        match result {
            Ok(n) if n < run.data.len() => Err(Error::NoSpace),
            other => other,
        }
    }
}
