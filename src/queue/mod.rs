//! Task submission abstraction.
//!
//! The engine never owns threads directly. Every unit of asynchronous work
//! (first load, H decompression, reconstruction, a streaming pass) is a
//! boxed closure handed to a [`WorkQueue`]. The queue also reports the two
//! numbers the backpressure heuristic needs: tasks waiting and idle workers.
//!
//! - [`InlineQueue`]: runs every task on the submitting thread
//! - [`TokioWorkQueue`]: a bounded pool on tokio's blocking threads

mod tokio_pool;

pub use tokio_pool::{TokioWorkQueue, DEFAULT_QUEUE_CAPACITY};

/// A unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A pool of workers consuming submitted tasks.
pub trait WorkQueue: Send + Sync {
    /// Submit a task. Returns `false` if the queue refused it; the task is
    /// dropped without running.
    fn submit(&self, task: Task) -> bool;

    /// Tasks submitted but not yet started.
    fn pending_task_count(&self) -> usize;

    /// Workers currently waiting for work.
    fn idle_worker_count(&self) -> usize;

    /// Total number of workers.
    fn worker_count(&self) -> usize;
}

/// Runs every task synchronously inside `submit`.
///
/// Reports no idle workers, so the scheduler runs its own work inline and
/// passes become fully deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineQueue;

impl InlineQueue {
    pub fn new() -> Self {
        Self
    }
}

impl WorkQueue for InlineQueue {
    fn submit(&self, task: Task) -> bool {
        task();
        true
    }

    fn pending_task_count(&self) -> usize {
        0
    }

    fn idle_worker_count(&self) -> usize {
        0
    }

    fn worker_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_queue_runs_immediately() {
        let queue = InlineQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        assert!(queue.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_task_count(), 0);
        assert_eq!(queue.idle_worker_count(), 0);
    }
}
