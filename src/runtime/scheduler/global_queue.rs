//! Global injection queue.
//!
//! A thread-safe unbounded queue for jobs pushed from any thread and popped by
//! the worker pool.

use crossbeam_queue::SegQueue;
use std::fmt;

/// A unit of work for the worker pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A global job queue.
#[derive(Default)]
pub struct GlobalQueue {
    inner: SegQueue<Job>,
}

impl GlobalQueue {
    /// Creates a new global queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Pushes a job to the global queue.
    pub fn push(&self, job: Job) {
        self.inner.push(job);
    }

    /// Pops a job from the global queue.
    pub fn pop(&self) -> Option<Job> {
        self.inner.pop()
    }

    /// Returns the number of jobs in the queue.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for GlobalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalQueue")
            .field("len", &self.inner.len())
            .finish()
    }
}
