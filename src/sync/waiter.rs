//! Blocking waiter.
//!
//! [`BlockingWaiter::wait`] parks the calling OS thread on the task's
//! condition variable until the task is terminal. The signal comes from
//! whichever thread performs the terminal transition, so waking a waiter
//! never needs an affinity context to run.
//!
//! Calling `wait` on a context's owner thread for a task whose resume is
//! queued on that same context never returns: the resume cannot run while
//! the owner is blocked. Give the waiter a timeout to turn that deadlock into
//! an [`Error::Timeout`].

use crate::error::{Error, Result};
use crate::runtime::Task;
use crate::tracing_compat::{debug, warn};
use std::time::{Duration, Instant};

/// Blocks the calling thread until a task finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockingWaiter {
    timeout: Option<Duration>,
}

impl BlockingWaiter {
    /// A waiter that blocks for as long as it takes.
    #[must_use]
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// A waiter that gives up after `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// The configured bound, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Blocks until `task` is terminal and returns its outcome.
    ///
    /// A faulted task's error is returned unchanged; a cancelled task yields
    /// [`Error::Cancelled`]. With a timeout, expiry yields [`Error::Timeout`].
    pub fn wait<T: Clone>(&self, task: &Task<T>) -> Result<T> {
        let started = Instant::now();
        debug!(task = %task.id(), timeout = ?self.timeout, "blocking wait");
        let deadline = self.timeout.map(|limit| started + limit);
        match task.core.wait_until(deadline) {
            Some(outcome) => outcome,
            None => {
                let waited = started.elapsed();
                if Self::deadlock_suspected(task) {
                    warn!(
                        task = %task.id(),
                        waited = ?waited,
                        "blocking wait timed out on the owner thread of the context \
                         holding the task's resume; this is a deadlock"
                    );
                } else {
                    debug!(task = %task.id(), waited = ?waited, "blocking wait timed out");
                }
                Err(Error::Timeout { waited })
            }
        }
    }

    /// True when the caller owns the context the task captured at its latest
    /// suspension and that context has queued work the caller is blocking.
    #[must_use]
    pub fn deadlock_suspected<T>(task: &Task<T>) -> bool {
        !task.is_terminal()
            && task
                .captured_context()
                .is_some_and(|ctx| ctx.current_thread_is_owner() && ctx.pending() > 0)
    }
}
