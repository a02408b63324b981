//! Cached block — one decompressed block with incremental decoding and
//! usage metadata (spec §4.6).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::byte_buffer::ByteBuffer;
use crate::codec::{CodecError, DecodeStatus, Decompressor};

/// A block's decompressed bytes, built up incrementally by feeding
/// compressed input to its `Decompressor` and tracking how recently it was
/// touched for the LRU's eviction decision.
pub struct CachedBlock {
    decompressor: Mutex<Box<dyn Decompressor>>,
    buffer: Mutex<ByteBuffer>,
    frozen: Mutex<Option<Arc<[u8]>>>,
    complete: AtomicBool,
    last_used_nanos: AtomicU64,
    epoch: Instant,
    /// Set when any of this block's pages are known to have been paged out
    /// by the OS (best-effort, spec §4.6's usage metadata); informational
    /// only, never gates correctness.
    any_pages_swapped_out: AtomicBool,
}

impl CachedBlock {
    pub fn new(decompressor: Box<dyn Decompressor>) -> Self {
        Self {
            decompressor: Mutex::new(decompressor),
            buffer: Mutex::new(ByteBuffer::new()),
            frozen: Mutex::new(None),
            complete: AtomicBool::new(false),
            last_used_nanos: AtomicU64::new(0),
            epoch: Instant::now(),
            any_pages_swapped_out: AtomicBool::new(false),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Feeds `input` into the decoder and extends the buffer. Returns the
    /// number of output bytes available so far once this call (and any
    /// prior ones) have run; freezes the buffer and records the result the
    /// first time the decoder reports `Complete`.
    pub fn decompress_until(&self, input: &[u8]) -> Result<usize, CodecError> {
        self.touch();
        if self.is_complete() {
            return Ok(self.frozen.lock().unwrap().as_ref().map_or(0, |b| b.len()));
        }

        let mut decompressor = self.decompressor.lock().unwrap();
        let mut buffer = self.buffer.lock().unwrap();
        let status = {
            let mut out = Vec::new();
            let status = decompressor.run(input, &mut out)?;
            buffer.extend(&out);
            status
        };

        if status == DecodeStatus::Complete {
            let frozen = buffer.freeze();
            *self.frozen.lock().unwrap() = Some(frozen);
            self.complete.store(true, Ordering::Release);
        }

        Ok(buffer.len())
    }

    /// Returns the decompressed bytes available so far. Only valid to slice
    /// arbitrarily once `is_complete()`; while still decoding, callers
    /// should only rely on lengths already confirmed via `decompress_until`.
    pub fn data(&self) -> Arc<[u8]> {
        if let Some(frozen) = self.frozen.lock().unwrap().clone() {
            return frozen;
        }
        self.buffer.lock().unwrap().as_slice().into()
    }

    pub fn range_end(&self) -> usize {
        self.data().len()
    }

    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_nanos() as u64;
        self.last_used_nanos.store(now, Ordering::Relaxed);
    }

    pub fn last_used_before(&self, age: std::time::Duration) -> bool {
        let last = self.last_used_nanos.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_nanos() as u64;
        now.saturating_sub(last) >= age.as_nanos() as u64
    }

    pub fn any_pages_swapped_out(&self) -> bool {
        self.any_pages_swapped_out.load(Ordering::Relaxed)
    }

    pub fn mark_pages_swapped_out(&self) {
        self.any_pages_swapped_out.store(true, Ordering::Relaxed);
    }

    /// Approximate resident size in bytes, for cache admission accounting.
    pub fn memory_size(&self) -> usize {
        self.data().len()
    }
}
