//! Byte buffer — freeze-after-fill append buffer used as a decompression
//! target (spec §4.5).
//!
//! A [`ByteBuffer`] starts `Mutable` so a decoder can append to it across
//! several `run` calls, then transitions to `Frozen` exactly once so every
//! clone of the resulting `Arc<[u8]>` can be shared between concurrent
//! readers without copying. The state lives as an enum field on one handle,
//! matching how `CachedBlock` needs to hold the same buffer across that
//! transition rather than swapping types out from under its callers.

use std::sync::Arc;

enum State {
    Mutable(Vec<u8>),
    Frozen(Arc<[u8]>),
}

pub struct ByteBuffer {
    state: State,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self {
            state: State::Mutable(Vec::new()),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            state: State::Mutable(Vec::with_capacity(cap)),
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.state, State::Frozen(_))
    }

    pub fn len(&self) -> usize {
        match &self.state {
            State::Mutable(v) => v.len(),
            State::Frozen(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `data`. Panics if the buffer is already frozen — the cache
    /// never appends after a decoder reports `Complete`.
    pub fn extend(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Mutable(v) => v.extend_from_slice(data),
            State::Frozen(_) => panic!("ByteBuffer::extend called on a frozen buffer"),
        }
    }

    /// Consumes the mutable contents and transitions to `Frozen`, returning
    /// a cheaply cloneable handle to the final bytes.
    pub fn freeze(&mut self) -> Arc<[u8]> {
        if let State::Mutable(v) = &mut self.state {
            let frozen: Arc<[u8]> = std::mem::take(v).into();
            self.state = State::Frozen(frozen);
        }
        match &self.state {
            State::Frozen(b) => b.clone(),
            State::Mutable(_) => unreachable!(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.state {
            State::Mutable(v) => v.as_slice(),
            State::Frozen(b) => b,
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
