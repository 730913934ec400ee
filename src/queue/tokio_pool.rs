//! Worker pool on tokio's blocking threads.
//!
//! Decompression and reconstruction are CPU-bound and the chunk reads are
//! blocking, so tasks run through `spawn_blocking` on a runtime owned by the
//! queue. The blocking pool is capped at the worker count; tasks beyond that
//! wait inside tokio's queue and show up as pending.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

use super::{Task, WorkQueue};

/// Default bound on submitted but unstarted tasks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    active: AtomicUsize,
    lock: Mutex<()>,
    finished: Condvar,
}

impl Counters {
    fn is_busy(&self) -> bool {
        self.pending.load(Ordering::Acquire) + self.active.load(Ordering::Acquire) > 0
    }
}

/// Marks a task active for as long as it runs, including on panic.
struct ActiveGuard(Arc<Counters>);

impl ActiveGuard {
    fn enter(counters: Arc<Counters>) -> Self {
        counters.active.fetch_add(1, Ordering::AcqRel);
        counters.pending.fetch_sub(1, Ordering::AcqRel);
        Self(counters)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
        let _lock = self.0.lock.lock();
        self.0.finished.notify_all();
    }
}

/// A fixed-size worker pool backed by a tokio runtime.
///
/// Must be dropped outside of any tokio runtime; dropping waits for running
/// tasks to finish.
pub struct TokioWorkQueue {
    runtime: Runtime,
    workers: usize,
    capacity: usize,
    counters: Arc<Counters>,
}

impl TokioWorkQueue {
    /// Create a pool with `workers` blocking threads.
    pub fn new(workers: usize) -> std::io::Result<Self> {
        Self::with_capacity(workers, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a pool that refuses submissions once `capacity` tasks wait.
    pub fn with_capacity(workers: usize, capacity: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("isyntax-worker")
            .enable_all()
            .build()?;
        debug!(workers, capacity, "Started worker pool");
        Ok(Self {
            runtime,
            workers,
            capacity,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Tasks currently running.
    pub fn active_task_count(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    /// Block until no task is pending or running.
    ///
    /// Tasks submitted by running tasks are waited for as well.
    pub fn wait_idle(&self) {
        let mut lock = self.counters.lock.lock();
        while self.counters.is_busy() {
            self.counters
                .finished
                .wait_for(&mut lock, Duration::from_millis(10));
        }
    }
}

impl WorkQueue for TokioWorkQueue {
    fn submit(&self, task: Task) -> bool {
        let pending = self.counters.pending.fetch_add(1, Ordering::AcqRel);
        if pending >= self.capacity {
            self.counters.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(pending, capacity = self.capacity, "Work queue full, refusing task");
            return false;
        }

        let counters = Arc::clone(&self.counters);
        self.runtime.spawn_blocking(move || {
            let _active = ActiveGuard::enter(counters);
            task();
        });
        true
    }

    fn pending_task_count(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    fn idle_worker_count(&self) -> usize {
        self.workers.saturating_sub(self.active_task_count())
    }

    fn worker_count(&self) -> usize {
        self.workers
    }
}

impl std::fmt::Debug for TokioWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioWorkQueue")
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("pending", &self.pending_task_count())
            .field("active", &self.active_task_count())
            .finish()
    }
}
