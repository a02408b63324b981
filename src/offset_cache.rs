//! Offset cache — sparse per-inode chunk-index → file-offset map (spec
//! §4.8 "binary search into a per-inode offset cache").
//!
//! Ported from `original_source/include/dwarfs/reader/internal/offset_cache.h`'s
//! `basic_offset_cache`: instead of walking every chunk of a large file to
//! translate a byte offset into a chunk index, the cache remembers the file
//! offset at every `K`th chunk boundary (`K` = `chunk_index_interval`), so a
//! lookup is a binary search over `n/K` entries plus a linear chunk walk
//! from there. A "last access" shortcut skips the search entirely for
//! sequential reads, the dominant access pattern this format is optimized
//! for. The per-filesystem top-level cache bounds how many inodes' tables
//! are held at once; upstream uses `folly::EvictingCacheMap` for that, which
//! isn't in this dependency stack, so eviction here is a small hand-rolled
//! recency list over the same `Mutex`-guarded map the rest of this crate
//! already uses for similar bookkeeping (e.g. `cache::BlockCache`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Accumulates chunk-index/offset pairs discovered during one chunk walk,
/// to be folded into the shared table in a single `update` call rather than
/// taking the per-inode lock once per chunk.
#[derive(Default)]
pub struct Updater {
    first_index: u32,
    offsets: Vec<u64>,
    /// Caps how many offsets one walk buffers before folding into the
    /// shared table, so a single very long chunk walk can't grow this
    /// scratch vector without bound.
    max_inline: usize,
}

impl Updater {
    pub fn set_first_index(&mut self, first_index: u32) {
        self.first_index = first_index;
    }

    /// Records the file offset of chunk `index`, if `index` lands exactly
    /// on a `chunk_index_interval` boundary past what's already recorded.
    pub fn add_offset(&mut self, index: u32, offset: u64, chunk_index_interval: u32) {
        if index < chunk_index_interval || index % chunk_index_interval != 0 {
            return;
        }
        if self.max_inline != 0 && self.offsets.len() >= self.max_inline {
            return;
        }
        let ix = index / chunk_index_interval - 1;
        if ix == self.first_index + self.offsets.len() as u32 {
            self.offsets.push(offset);
        }
    }

    pub fn first_index(&self) -> u32 {
        self.first_index
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}

struct Inner {
    last_chunk_index: u32,
    last_file_offset: u64,
    last_chunk_size: u64,
    /// `offsets[i]` is the file offset at chunk index `(i + 1) * K`.
    offsets: Vec<u64>,
}

/// One inode's sparse chunk-index table.
pub struct ChunkOffsets {
    inner: Mutex<Inner>,
    chunk_index_interval: u32,
    max_inline_offsets: usize,
}

impl ChunkOffsets {
    fn new(total_chunks: u32, chunk_index_interval: u32, max_inline_offsets: usize) -> Self {
        let capacity = (total_chunks / chunk_index_interval.max(1)).saturating_sub(1) as usize;
        Self {
            inner: Mutex::new(Inner {
                last_chunk_index: 0,
                last_file_offset: 0,
                last_chunk_size: 0,
                offsets: Vec::with_capacity(capacity),
            }),
            chunk_index_interval,
            max_inline_offsets,
        }
    }

    /// Folds `upd`'s freshly observed offsets into the table and records
    /// `chunk_index`/`file_offset`/`chunk_size` as the new "last access"
    /// shortcut.
    pub fn update(&self, upd: &Updater, chunk_index: u32, file_offset: u64, chunk_size: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_chunk_index = chunk_index;
        inner.last_file_offset = file_offset;
        inner.last_chunk_size = chunk_size;

        let first_index = upd.first_index() as usize;
        let offsets = upd.offsets();
        if first_index + offsets.len() > inner.offsets.len() {
            let skip = inner.offsets.len().saturating_sub(first_index);
            inner.offsets.extend_from_slice(&offsets[skip.min(offsets.len())..]);
        }
    }

    /// Returns the best known `(chunk_index, file_offset)` starting point
    /// for a read at `offset`, and records a fresh [`Updater`] for the
    /// caller's subsequent chunk walk.
    pub fn find(&self, offset: u64) -> (u32, u64, Updater) {
        let inner = self.inner.lock().unwrap();
        let mut upd = Updater {
            first_index: inner.offsets.len() as u32,
            offsets: Vec::new(),
            max_inline: self.max_inline_offsets,
        };

        if inner.last_file_offset <= offset && offset <= inner.last_file_offset + inner.last_chunk_size {
            return (inner.last_chunk_index, inner.last_file_offset, upd);
        }

        if !inner.offsets.is_empty() {
            let mut best_index = inner.offsets.len();
            if offset < *inner.offsets.last().unwrap() {
                if let Ok(pos) | Err(pos) = inner.offsets.binary_search(&offset) {
                    best_index = pos;
                }
            }
            if best_index > 0 {
                upd.first_index = inner.offsets.len() as u32;
                return (
                    self.chunk_index_interval * best_index as u32,
                    inner.offsets[best_index - 1],
                    upd,
                );
            }
        }

        (0, 0, upd)
    }
}

/// Per-filesystem cache of [`ChunkOffsets`] tables, one per inode that has
/// been read from, bounded to `capacity` resident inodes.
pub struct OffsetCache {
    capacity: usize,
    chunk_index_interval: u32,
    max_inline_offsets: usize,
    state: Mutex<State>,
}

struct State {
    entries: HashMap<u32, Arc<ChunkOffsets>>,
    recency: VecDeque<u32>,
}

impl OffsetCache {
    pub fn new(capacity: usize, chunk_index_interval: u32, max_inline_offsets: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            chunk_index_interval,
            max_inline_offsets,
            state: Mutex::new(State {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
        }
    }

    /// Returns the existing table for `inode`, or creates (and caches) an
    /// empty one sized for `total_chunks`.
    pub fn find(&self, inode: u32, total_chunks: u32) -> Arc<ChunkOffsets> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.entries.get(&inode) {
            let existing = existing.clone();
            state.recency.retain(|&i| i != inode);
            state.recency.push_back(inode);
            return existing;
        }

        if state.entries.len() >= self.capacity {
            if let Some(oldest) = state.recency.pop_front() {
                state.entries.remove(&oldest);
            }
        }

        let table = Arc::new(ChunkOffsets::new(total_chunks, self.chunk_index_interval, self.max_inline_offsets));
        state.entries.insert(inode, table.clone());
        state.recency.push_back(inode);
        table
    }

    pub fn chunk_index_interval(&self) -> u32 {
        self.chunk_index_interval
    }
}
