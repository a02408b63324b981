//! Block cache — byte-budgeted, concurrent cache of decompressed blocks
//! (spec §4.7).
//!
//! Each `Block` section is decompressed at most once and shared between
//! every reader that asks for a range of it. `get` returns a [`BlockFuture`]
//! immediately; the actual decompression runs on the [`WorkerGroup`], and
//! the future resolves once the block is fully decompressed. A block whose
//! byte range is still covered by live `BlockRange`s stays resident even
//! after it's evicted from the lookup table — the `Arc<[u8]>` a range holds
//! onto keeps the bytes alive independent of cache bookkeeping, matching
//! spec's *Evicted-but-still-live* state without needing separate storage.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, trace, warn};

use crate::cached_block::CachedBlock;
use crate::codec::Registry;
use crate::error::{DwarfsError, Result};
use crate::image::Image;
use crate::section::{Section, SectionType};
use crate::worker::WorkerGroup;

struct Entry {
    block: Arc<CachedBlock>,
    section: Section,
    live_ranges: AtomicUsize,
    /// Single source of truth for "is this block done decoding, and with
    /// what result" — `get` and the decompressing worker both take this
    /// lock, so a waiter can never be registered after the worker has
    /// already drained the list (the race a separate `AtomicBool` completion
    /// flag on `CachedBlock` cannot rule out on its own).
    waiters: Mutex<WaitState>,
}

enum WaitState {
    Pending(Vec<std::sync::mpsc::Sender<Result<()>>>),
    Done(std::result::Result<(), String>),
}

struct State {
    entries: HashMap<u32, Arc<Entry>>,
    /// Recency order, least-recent first. A `block_number` appears at most
    /// once; re-touching moves it to the back.
    lru: VecDeque<u32>,
    /// Bytes reserved by entries currently in the map: the compressed
    /// section length while an entry is pending, corrected to the true
    /// decompressed size once decoding completes.
    current_bytes: u64,
}

/// State shared with in-flight decompression jobs; kept behind its own `Arc`
/// so `BlockCache` itself doesn't need to be wrapped in one by callers.
struct Shared {
    state: Mutex<State>,
    admission: Condvar,
    max_bytes: u64,
}

pub struct BlockCache {
    image: Arc<Image>,
    registry: Arc<Registry>,
    workers: Arc<WorkerGroup>,
    disable_integrity_check: bool,
    mm_release: bool,
    blocks: Vec<Section>,
    shared: Arc<Shared>,
}

/// A reference-counted borrow of a contiguous slice of a cached block's
/// decompressed data. Keeps the bytes alive regardless of whether the
/// owning cache entry has since been evicted.
pub struct BlockRange {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
    entry: Arc<Entry>,
}

impl BlockRange {
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Drop for BlockRange {
    fn drop(&mut self) {
        self.entry.live_ranges.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A single-shot handle to a block range still being decompressed, per
/// spec §4.7's `get(...) -> Future<BlockRange>` contract and spec §9's
/// note that a small single-shot primitive suffices (no async runtime).
pub struct BlockFuture {
    entry: Arc<Entry>,
    start: usize,
    end: usize,
    ready: FutureState,
}

enum FutureState {
    Ready,
    Pending(std::sync::mpsc::Receiver<Result<()>>),
}

impl BlockFuture {
    /// Blocks until the range is decompressed and returns it.
    pub fn wait(self) -> Result<BlockRange> {
        match self.ready {
            FutureState::Ready => Ok(self.finish()),
            FutureState::Pending(ref rx) => {
                rx.recv().map_err(|_| DwarfsError::Cancelled)??;
                Ok(self.finish())
            }
        }
    }

    /// Non-blocking readiness check; `None` means still pending.
    pub fn poll(&self) -> Option<bool> {
        match &self.ready {
            FutureState::Ready => Some(true),
            FutureState::Pending(rx) => match rx.try_recv() {
                Ok(Ok(())) => Some(true),
                Ok(Err(_)) => Some(false),
                Err(_) => None,
            },
        }
    }

    fn finish(self) -> BlockRange {
        let data = self.entry.block.data();
        self.entry.live_ranges.fetch_add(1, Ordering::AcqRel);
        BlockRange {
            data,
            start: self.start,
            end: self.end,
            entry: self.entry,
        }
    }
}

impl BlockCache {
    /// Indexes every `Block` section of `image` in on-disk order; chunk
    /// `block_number`s are positions into this sequence (spec §3).
    pub fn new(
        image: Arc<Image>,
        registry: Arc<Registry>,
        workers: Arc<WorkerGroup>,
        max_bytes: u64,
        disable_integrity_check: bool,
        mm_release: bool,
    ) -> Self {
        let blocks: Vec<Section> = image.sections_of_type(SectionType::Block).copied().collect();
        Self {
            image,
            registry,
            workers,
            disable_integrity_check,
            mm_release,
            blocks,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    lru: VecDeque::new(),
                    current_bytes: 0,
                }),
                admission: Condvar::new(),
                max_bytes,
            }),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Requests `size` bytes at `offset_in_block` from `block_number`.
    pub fn get(&self, block_number: u32, offset_in_block: u32, size: u32) -> Result<BlockFuture> {
        let section = *self
            .blocks
            .get(block_number as usize)
            .ok_or(DwarfsError::NoSuchInode { inode: block_number })?;

        if !self.registry.is_registered(section.compression) {
            return Err(crate::codec::CodecError::UnknownCompression(section.compression).into());
        }

        let start = offset_in_block as usize;
        let end = start + size as usize;
        trace!(block_number, offset_in_block, size, "cache get");

        let entry = self.lookup_or_admit(block_number, section);
        entry.block.touch();
        self.touch_lru(block_number);

        // Registering as a waiter (or observing completion) happens under
        // the same lock the worker drains under, so there's no window
        // between "not complete yet" and "waiter pushed" that a completing
        // worker can slip through unobserved.
        let mut waiters = entry.waiters.lock().unwrap();
        match &mut *waiters {
            WaitState::Done(Ok(())) => {
                drop(waiters);
                Ok(BlockFuture {
                    entry,
                    start,
                    end,
                    ready: FutureState::Ready,
                })
            }
            WaitState::Done(Err(message)) => Err(DwarfsError::Decompression(message.clone())),
            WaitState::Pending(senders) => {
                let (tx, rx) = std::sync::mpsc::channel();
                senders.push(tx);
                drop(waiters);
                Ok(BlockFuture {
                    entry,
                    start,
                    end,
                    ready: FutureState::Pending(rx),
                })
            }
        }
    }

    fn touch_lru(&self, block_number: u32) {
        let mut state = self.shared.state.lock().unwrap();
        state.lru.retain(|&b| b != block_number);
        state.lru.push_back(block_number);
    }

    fn lookup_or_admit(&self, block_number: u32, section: Section) -> Arc<Entry> {
        {
            let state = self.shared.state.lock().unwrap();
            if let Some(entry) = state.entries.get(&block_number) {
                return entry.clone();
            }
        }

        let reserve = section.length;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(entry) = state.entries.get(&block_number) {
                return entry.clone();
            }
            if state.current_bytes + reserve <= self.shared.max_bytes || state.entries.is_empty() {
                break;
            }
            if !Self::evict_one(&mut state) {
                state = self.shared.admission.wait(state).unwrap();
            }
        }

        // Registered-ness was already confirmed by `get` before admission.
        let decoder = self
            .registry
            .make_decoder(section.compression)
            .expect("compression registered but make_decoder failed");
        let block = Arc::new(CachedBlock::new(decoder));
        let entry = Arc::new(Entry {
            block,
            section,
            live_ranges: AtomicUsize::new(0),
            waiters: Mutex::new(WaitState::Pending(Vec::new())),
        });
        state.entries.insert(block_number, entry.clone());
        state.current_bytes += reserve;
        state.lru.push_back(block_number);
        debug!(block_number, reserve, resident = state.current_bytes, "admitted block");
        drop(state);

        self.spawn_decompress(entry.clone());
        entry
    }

    fn spawn_decompress(&self, entry: Arc<Entry>) {
        let image = self.image.clone();
        let disable_integrity_check = self.disable_integrity_check;
        let mm_release = self.mm_release;
        let shared = self.shared.clone();

        self.workers.submit(move || {
            let result = decompress_block(&image, &entry, disable_integrity_check);
            if let Err(e) = &result {
                warn!(section = entry.section.section_number, error = %e, "block decompression failed");
            }
            if result.is_ok() && mm_release {
                image.view().release_until(entry.section.end());
            }
            // Transition to `Done` and pull out the waiters to notify under
            // the same lock `get` checks, then drain outside it so a slow
            // channel send can't hold the lock up.
            let waiters = {
                let mut state = entry.waiters.lock().unwrap();
                let done = match &result {
                    Ok(()) => WaitState::Done(Ok(())),
                    Err(e) => WaitState::Done(Err(e.to_string())),
                };
                match std::mem::replace(&mut *state, done) {
                    WaitState::Pending(senders) => senders,
                    WaitState::Done(_) => Vec::new(),
                }
            };
            for tx in waiters {
                let _ = tx.send(match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(clone_error(e)),
                });
            }

            if result.is_ok() {
                let mut state = shared.state.lock().unwrap();
                let reserved = entry.section.length;
                let actual = entry.block.memory_size() as u64;
                state.current_bytes = state.current_bytes.saturating_sub(reserved) + actual;
                drop(state);
                shared.admission.notify_all();
            }
        });
    }

    fn evict_one(state: &mut State) -> bool {
        let candidate = state.lru.iter().position(|b| {
            state
                .entries
                .get(b)
                .map(|e| e.live_ranges.load(Ordering::Acquire) == 0 && e.block.is_complete())
                .unwrap_or(false)
        });
        let Some(pos) = candidate else { return false };
        let block_number = state.lru.remove(pos).unwrap();
        if let Some(entry) = state.entries.remove(&block_number) {
            state.current_bytes = state.current_bytes.saturating_sub(entry.block.memory_size() as u64);
        }
        true
    }

    /// Evicts every complete, unreferenced block idle for at least `max_age`
    /// — the optional "tidy" thread's sweep (spec §4.7).
    pub fn evict_idle(&self, max_age: std::time::Duration) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        let idle: Vec<u32> = state
            .lru
            .iter()
            .copied()
            .filter(|b| {
                state.entries.get(b).is_some_and(|e| {
                    e.live_ranges.load(Ordering::Acquire) == 0
                        && e.block.is_complete()
                        && e.block.last_used_before(max_age)
                })
            })
            .collect();
        for block_number in &idle {
            state.lru.retain(|b| b != block_number);
            if let Some(entry) = state.entries.remove(block_number) {
                state.current_bytes = state.current_bytes.saturating_sub(entry.block.memory_size() as u64);
            }
        }
        idle.len()
    }

    pub fn current_bytes(&self) -> u64 {
        self.shared.state.lock().unwrap().current_bytes
    }
}

fn decompress_block(image: &Image, entry: &Entry, disable_integrity_check: bool) -> Result<()> {
    let section = entry.section;
    if !disable_integrity_check && !section.check_fast(image.view().as_ref())? {
        return Err(DwarfsError::Decompression(format!(
            "integrity check failed for block section {}",
            section.section_number
        )));
    }
    let payload = section.payload_segment(image.view().as_ref())?;
    entry.block.decompress_until(payload.as_slice())?;
    if !entry.block.is_complete() {
        return Err(DwarfsError::Decompression(format!(
            "decoder for block section {} did not report completion after a single full payload",
            section.section_number
        )));
    }
    Ok(())
}

fn clone_error(e: &DwarfsError) -> DwarfsError {
    DwarfsError::Decompression(e.to_string())
}
