//! Stored task type and its runner.
//!
//! `StoredTask` wraps a type-erased task body. [`Runner`] owns it and is the
//! task's waker: waking the runner polls the body on the waking thread. Which
//! thread that is gets decided by the suspension point that scheduled the
//! wake, never by the runner.

use super::task::Lifecycle;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, ThreadId};

/// A type-erased future stored by a runner.
///
/// The future is expected to publish its own result (typically into a
/// `TaskCore`) before returning `Ready`.
pub struct StoredTask {
    /// The pinned, boxed future to poll.
    future: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl StoredTask {
    /// Creates a new stored task from a future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
        }
    }

    /// Polls the stored task.
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for StoredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTask").finish_non_exhaustive()
    }
}

/// Drives one task body; at most one thread polls it at a time.
///
/// A wake raised by the thread that is currently polling (an inline self-wake)
/// is recorded and answered by polling again once the current poll returns. A
/// wake from any other thread waits for the in-flight poll to finish and then
/// polls on the waking thread, so a resume dispatched to a worker always
/// continues the body on that worker.
pub(crate) struct Runner {
    body: Mutex<Option<StoredTask>>,
    poller: Mutex<Option<ThreadId>>,
    notified: AtomicBool,
    lifecycle: Arc<dyn Lifecycle>,
}

impl Runner {
    pub(crate) fn new(body: StoredTask, lifecycle: Arc<dyn Lifecycle>) -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(Some(body)),
            poller: Mutex::new(None),
            notified: AtomicBool::new(false),
            lifecycle,
        })
    }

    /// Polls the body on the calling thread.
    ///
    /// Called from inside this runner's own poll, it only flags a re-poll.
    pub(crate) fn run(self: &Arc<Self>) {
        let me = thread::current().id();
        if *self.poller.lock() == Some(me) {
            self.notified.store(true, Ordering::Release);
            return;
        }

        let mut body = self.body.lock();
        *self.poller.lock() = Some(me);
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let finished = loop {
            self.notified.store(false, Ordering::Release);
            if self.poll_once(&mut body, &mut cx) {
                break body.take();
            }
            if !self.notified.load(Ordering::Acquire) {
                break None;
            }
            trace!(task = %self.lifecycle.id(), "woken mid-poll, polling again");
        };
        *self.poller.lock() = None;
        drop(body);
        // The body may own the last scheduler handle; release it unlocked.
        drop(finished);
    }

    /// Returns true when the body should be discarded: it finished, or the
    /// task is already terminal.
    fn poll_once(&self, body: &mut Option<StoredTask>, cx: &mut Context<'_>) -> bool {
        let Some(task) = body.as_mut() else {
            return true;
        };
        if self.lifecycle.is_terminal() {
            trace!(task = %self.lifecycle.id(), "dropping body of terminal task");
            return true;
        }
        self.lifecycle.mark_running();
        task.poll(cx).is_ready()
    }
}

impl Wake for Runner {
    fn wake(self: Arc<Self>) {
        self.run();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.run();
    }
}
