//! Memory manager — priority-heap, credit-based admission (spec §4.11
//! "Worker group + memory manager").
//!
//! Ported from `original_source/include/dwarfs/memory_manager.h`: callers
//! `request` a credit for `size` bytes at a given priority (negative is
//! "high priority" and may dip into the `hipri_reserve` headroom low
//! priority requests can't touch); the credit is granted once enough of the
//! budget frees up, in priority order and FIFO within a priority tier. A
//! `CreditHandle` releases its bytes back to the pool on drop, or earlier
//! via `release_partial` for callers that can give back memory in stages.
//! The C++ original uses a `std::latch` per request; this uses one shared
//! `Condvar` and a generation check instead, since `std::latch` has no
//! direct std equivalent and the wakeup fan-out here is small.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};

struct PendingRequest {
    size: u64,
    sequence: u64,
    priority: i32,
    tag: String,
}

struct ActiveInfo {
    size: u64,
    tag: String,
}

struct State {
    pending: BinaryHeap<Reverse<(i32, u64)>>,
    pending_by_key: HashMap<(i32, u64), PendingRequest>,
    active: HashMap<u64, ActiveInfo>,
    granted: std::collections::HashSet<u64>,
    sequence: u64,
    used: u64,
    limit: u64,
    hipri_reserve: u64,
}

pub struct MemoryManager {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Debug, Clone, Copy)]
pub struct UsageInfo {
    pub active_size: u64,
    pub active_count: u64,
}

impl MemoryManager {
    pub fn new(limit: u64, hipri_reserve: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                pending: BinaryHeap::new(),
                pending_by_key: HashMap::new(),
                active: HashMap::new(),
                granted: std::collections::HashSet::new(),
                sequence: 0,
                used: 0,
                limit,
                hipri_reserve,
            }),
            cond: Condvar::new(),
        })
    }

    /// Requests `size` bytes at `priority` (negative = high priority) and
    /// blocks until the credit is granted.
    pub fn request(self: &Arc<Self>, size: u64, priority: i32, tag: impl Into<String>) -> CreditHandle {
        let sequence = self.request_noblock(size, priority, tag);
        self.wait_for(sequence);
        CreditHandle {
            mgr: self.clone(),
            sequence,
            remaining: Mutex::new(Some(size)),
        }
    }

    fn request_noblock(self: &Arc<Self>, size: u64, priority: i32, tag: impl Into<String>) -> u64 {
        let mut state = self.state.lock().unwrap();
        assert!(size > 0 && size <= state.limit, "invalid memory request size {size}");
        let sequence = state.sequence;
        state.sequence += 1;
        let key = (priority, sequence);
        state.pending.push(Reverse(key));
        state.pending_by_key.insert(
            key,
            PendingRequest {
                size,
                sequence,
                priority,
                tag: tag.into(),
            },
        );
        self.fulfill_locked(&mut state);
        sequence
    }

    fn wait_for(&self, sequence: u64) {
        let mut state = self.state.lock().unwrap();
        while !state.granted.contains(&sequence) {
            state = self.cond.wait(state).unwrap();
        }
    }

    fn fulfill_locked(&self, state: &mut State) {
        loop {
            let Some(&Reverse(key)) = state.pending.peek() else {
                break;
            };
            let need = state.pending_by_key.get(&key).unwrap().size;
            let hipri = key.0 < 0;
            let lopri_limit = state.limit.saturating_sub(state.hipri_reserve);

            if state.used + need > state.limit {
                break;
            }
            if !hipri && state.used + need > lopri_limit {
                break;
            }

            state.pending.pop();
            let req = state.pending_by_key.remove(&key).unwrap();
            state.used += need;
            state.active.insert(
                req.sequence,
                ActiveInfo {
                    size: req.size,
                    tag: req.tag,
                },
            );
            state.granted.insert(req.sequence);
        }
        self.cond.notify_all();
    }

    fn release(&self, sequence: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.active.remove(&sequence) {
            state.used -= info.size;
            state.granted.remove(&sequence);
            self.fulfill_locked(&mut state);
        }
    }

    fn release_partial(&self, sequence: u64, released: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.active.get_mut(&sequence) {
            info.size = info.size.saturating_sub(released);
            state.used = state.used.saturating_sub(released);
            self.fulfill_locked(&mut state);
        }
    }

    /// Per-tag resident bytes, plus a synthetic `"free"` entry for
    /// unclaimed budget.
    pub fn usage_by_tag(&self) -> Vec<(String, UsageInfo)> {
        let state = self.state.lock().unwrap();
        let mut by_tag: HashMap<String, UsageInfo> = HashMap::new();
        for info in state.active.values() {
            let entry = by_tag.entry(info.tag.clone()).or_insert(UsageInfo {
                active_size: 0,
                active_count: 0,
            });
            entry.active_size += info.size;
            entry.active_count += 1;
        }
        let mut result: Vec<_> = by_tag.into_iter().collect();
        result.push((
            "free".to_string(),
            UsageInfo {
                active_size: state.limit - state.used,
                active_count: 0,
            },
        ));
        result
    }

    pub fn used(&self) -> u64 {
        self.state.lock().unwrap().used
    }

    pub fn limit(&self) -> u64 {
        self.state.lock().unwrap().limit
    }
}

/// A granted credit. Releases its remaining bytes back to the manager on
/// drop; `release_partial` can give some of it back early.
pub struct CreditHandle {
    mgr: Arc<MemoryManager>,
    sequence: u64,
    remaining: Mutex<Option<u64>>,
}

impl CreditHandle {
    pub fn release_partial(&self, size: u64) {
        if size == 0 {
            return;
        }
        let mut remaining = self.remaining.lock().unwrap();
        if let Some(r) = remaining.as_mut() {
            if size >= *r {
                let last = *r;
                *remaining = None;
                drop(remaining);
                self.mgr.release_partial(self.sequence, last);
                self.mgr.release(self.sequence);
            } else {
                *r -= size;
                self.mgr.release_partial(self.sequence, size);
            }
        }
    }
}

impl Drop for CreditHandle {
    fn drop(&mut self) {
        if self.remaining.lock().unwrap().take().is_some() {
            self.mgr.release(self.sequence);
        }
    }
}
