//! Pending delay callbacks, keyed by deadline.
//!
//! A min-heap of `(deadline, callback)` pairs. Entries with equal deadlines
//! pop in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Instant;

/// Callback invoked when a timer is resolved.
///
/// Receives `true` when the deadline elapsed and `false` when the timer was
/// discarded by shutdown.
pub type TimerCallback = Box<dyn FnOnce(bool) + Send + 'static>;

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline is on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Delay callbacks waiting for their deadline; earliest first.
#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

impl TimerHeap {
    /// An empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers not yet popped or drained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a timer with the given deadline.
    pub fn insert(&mut self, deadline: Instant, callback: TimerCallback) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            callback,
        });
    }

    /// Deadline the driver should sleep until.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops the callbacks of all timers whose deadline is `<= now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry.callback);
            }
        }
        expired
    }

    /// Removes every timer and returns the callbacks.
    pub fn drain(&mut self) -> Vec<TimerCallback> {
        self.heap.drain().map(|entry| entry.callback).collect()
    }
}

impl fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHeap")
            .field("len", &self.heap.len())
            .field("next_deadline", &self.peek_deadline())
            .finish()
    }
}
