//! File reader — bounded-memory streaming iterator over an inode's data
//! (spec §4.9).
//!
//! Wraps [`crate::inode_reader::InodeReader`] in an `Iterator` that never
//! holds more than `max_bytes` of decompressed data resident at once: each
//! turn admits one "lease" of `min(remaining, max_bytes)` bytes, fills it
//! with enough block-cache gets to cover that range, and only asks for the
//! next lease once every range from the current one has been yielded to
//! the caller. The admission side is a small counting [`Semaphore`] the
//! caller constructs and shares across readers, the same shape as spec
//! §4.9's "caller provides a counting semaphore" — this crate doesn't pull
//! in an async runtime for it, so it's a direct `Mutex`+`Condvar` port of
//! the classic semaphore, in the same idiom `memory::MemoryManager` and
//! `cache::BlockCache` already use for blocking admission.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::Result;
use crate::inode_reader::{InodeReader, ReadSegment};
use crate::metadata::frozen::Chunk;

/// A classic counting semaphore: `acquire` blocks while no permits are
/// available, `SemaphorePermit`'s `Drop` returns one.
pub struct Semaphore {
    state: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(permits),
            cond: Condvar::new(),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> SemaphorePermit {
        let mut count = self.state.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
        SemaphorePermit { sem: self.clone() }
    }
}

pub struct SemaphorePermit {
    sem: Arc<Semaphore>,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        *self.sem.state.lock().unwrap() += 1;
        self.sem.cond.notify_one();
    }
}

/// Streams an inode's data in `max_bytes`-bounded leases, yielding one
/// [`ReadSegment`] (a cache-backed range, or a hole's zero run) per `next`.
pub struct FileReader {
    reader: Arc<InodeReader>,
    inode: u32,
    chunks: Arc<Vec<Chunk>>,
    total_size: u64,
    position: u64,
    max_bytes: usize,
    semaphore: Arc<Semaphore>,
    buffered: std::collections::VecDeque<ReadSegment>,
    /// Held for exactly as long as the current lease's segments haven't
    /// all been yielded yet; replaced (dropping the old one) only once
    /// `buffered` has fully drained.
    current_permit: Option<SemaphorePermit>,
    error: bool,
}

impl FileReader {
    pub fn new(
        reader: Arc<InodeReader>,
        inode: u32,
        chunks: Arc<Vec<Chunk>>,
        total_size: u64,
        max_bytes: usize,
        semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            reader,
            inode,
            chunks,
            total_size,
            position: 0,
            max_bytes: max_bytes.max(1),
            semaphore,
            buffered: std::collections::VecDeque::new(),
            current_permit: None,
            error: false,
        }
    }

    fn fill_next_lease(&mut self) -> Result<()> {
        let remaining = self.total_size - self.position;
        let lease = remaining.min(self.max_bytes as u64) as usize;
        let permit = self.semaphore.acquire();
        let segments = self.reader.readv(self.inode, &self.chunks, self.position, lease)?;
        let produced: u64 = segments.iter().map(|s| s.len() as u64).sum();
        self.position += produced;
        self.buffered = segments.into_iter().collect();
        self.current_permit = Some(permit);
        Ok(())
    }
}

impl Iterator for FileReader {
    type Item = Result<ReadSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error {
            return None;
        }
        if self.buffered.is_empty() {
            if self.position >= self.total_size {
                self.current_permit = None;
                return None;
            }
            if let Err(e) = self.fill_next_lease() {
                self.error = true;
                return Some(Err(e));
            }
            if self.buffered.is_empty() {
                // No progress made (shouldn't happen for a well-formed
                // chunk list, but avoids spinning forever if it does).
                self.current_permit = None;
                return None;
            }
        }
        self.buffered.pop_front().map(Ok)
    }
}
