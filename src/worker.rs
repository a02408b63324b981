//! Worker group — bounded thread pool with a back-pressured job queue
//! (spec §4.11).
//!
//! Built on `std::thread` plus a bounded `crossbeam_channel`, the same
//! primitive `examples/other_examples`'s `backy-extract` uses for its own
//! parallel decompression pool — the closest structural analog in the pack
//! to this component. Admission is back-pressure via blocking `send`: once
//! the queue is full, `submit` blocks the caller rather than growing
//! unboundedly, matching spec §5's bounded-queue resource model.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerGroup {
    sender: crossbeam_channel::Sender<Job>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cpu_nanos: Arc<[std::sync::atomic::AtomicU64]>,
}

impl WorkerGroup {
    /// Spawns `num_workers` threads pulling jobs from a queue bounded to
    /// `queue_capacity` pending entries.
    pub fn new(num_workers: usize, queue_capacity: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(queue_capacity.max(1));

        let cpu_nanos: Arc<[std::sync::atomic::AtomicU64]> = (0..num_workers)
            .map(|_| std::sync::atomic::AtomicU64::new(0))
            .collect();

        let handles = (0..num_workers)
            .map(|worker_index| {
                let receiver = receiver.clone();
                let cpu_nanos = cpu_nanos.clone();
                std::thread::Builder::new()
                    .name(format!("dwarfs-worker-{worker_index}"))
                    .spawn(move || {
                        worker_loop(worker_index, receiver, &cpu_nanos);
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            sender,
            handles: Mutex::new(handles),
            cpu_nanos,
        }
    }

    /// Enqueues `job`, blocking if the queue is at capacity.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // A closed receiver only happens during shutdown; dropping the job
        // silently in that case matches "no new work accepted after close".
        let _ = self.sender.send(Box::new(job));
    }

    /// Total CPU time (best-effort) spent across all worker threads since
    /// the group was created.
    pub fn total_cpu_time(&self) -> std::time::Duration {
        let total: u64 = self
            .cpu_nanos
            .iter()
            .map(|c| c.load(std::sync::atomic::Ordering::Relaxed))
            .sum();
        std::time::Duration::from_nanos(total)
    }

    pub fn num_workers(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        // Dropping `sender`'s last clone (this one) closes the channel;
        // `recv()` in `worker_loop` then returns `Err` and each thread exits.
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        drop(std::mem::replace(&mut self.sender, crossbeam_channel::bounded(1).0));
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_index: usize,
    receiver: crossbeam_channel::Receiver<Job>,
    cpu_nanos: &[std::sync::atomic::AtomicU64],
) {
    while let Ok(job) = receiver.recv() {
        let before = read_thread_cpu_time();
        job();
        let after = read_thread_cpu_time();
        if let (Some(before), Some(after)) = (before, after) {
            cpu_nanos[worker_index].fetch_add(
                after.saturating_sub(before),
                std::sync::atomic::Ordering::Relaxed,
            );
        }
    }
}

/// Reads this thread's CPU time in nanoseconds from `/proc/self/stat` on
/// Linux; returns `None` everywhere else (or on any parse failure), in
/// which case `total_cpu_time` simply under-reports rather than failing.
#[cfg(target_os = "linux")]
fn read_thread_cpu_time() -> Option<u64> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    let path = format!("/proc/self/task/{tid}/stat");
    let contents = std::fs::read_to_string(path).ok()?;
    // Fields are space-separated; the comm field (2nd) may itself contain
    // spaces inside parens, so split on the closing paren first.
    let after_comm = contents.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // utime is field 14, stime is field 15 counting from field 1 = pid;
    // relative to `after_comm` (which starts at field 3 = state), utime is
    // index 11 and stime is index 12.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) } as u64;
    if ticks_per_sec == 0 {
        return None;
    }
    Some((utime + stime) * 1_000_000_000 / ticks_per_sec)
}

#[cfg(not(target_os = "linux"))]
fn read_thread_cpu_time() -> Option<u64> {
    None
}
