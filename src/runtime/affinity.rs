//! Single-threaded affinity context.
//!
//! An [`AffinityContext`] models a "UI thread": one OS thread owns a FIFO
//! queue of continuations and drains it in [`run_loop`](AffinityContext::run_loop).
//! Any thread may [`post`](AffinityContext::post); only the owner runs what
//! was posted, one continuation at a time, in post order.
//!
//! # Deadlock shape
//!
//! ```text
//!  owner thread                       timer / worker
//!  ────────────                       ──────────────
//!  run_loop ─▶ continuation A
//!              │ start task
//!              │ BlockingWaiter::wait ◀─┐
//!              │   (blocked)            │ never signalled
//!              ▼                        │
//!  queue: [ resume(task) ] ◀── post ────┘
//! ```
//!
//! Continuation A cannot return until the task completes, and the task cannot
//! complete until the owner drains `resume(task)`.

use crate::error::{Error, Result, panic_message};
use crate::tracing_compat::{debug, error, trace};
use crate::types::ContextId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

/// Work queued on an affinity context.
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    items: VecDeque<Continuation>,
    closed: bool,
}

struct Inner {
    id: ContextId,
    name: String,
    queue: Mutex<QueueState>,
    ready: Condvar,
    owner: OnceLock<ThreadId>,
    draining: AtomicBool,
}

/// Handle to a single-threaded execution domain with a serialized work queue.
///
/// Cloning is cheap; all clones refer to the same queue.
#[derive(Clone)]
pub struct AffinityContext {
    inner: Arc<Inner>,
}

impl AffinityContext {
    /// Creates a context with no owner yet. The first thread to call
    /// [`run_loop`](Self::run_loop) becomes the owner.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ContextId::next(),
                name: name.into(),
                queue: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
                owner: OnceLock::new(),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the context identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueues a continuation. Callable from any thread; never waits for the
    /// owner.
    ///
    /// Fails with [`Error::ContextClosed`] once [`shutdown`](Self::shutdown)
    /// has been called, whatever is still queued.
    pub fn post<F>(&self, continuation: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let depth = {
            let mut queue = self.inner.queue.lock();
            if queue.closed {
                return Err(Error::ContextClosed(self.inner.id));
            }
            queue.items.push_back(Box::new(continuation));
            queue.items.len()
        };
        self.inner.ready.notify_one();
        trace!(context = %self.inner.id, depth, "continuation posted");
        Ok(())
    }

    /// Drains the queue on the calling thread until shutdown.
    ///
    /// Binds the calling thread as owner on first use. Continuations run in
    /// FIFO order, each to completion before the next starts. After shutdown
    /// the continuations that were already queued still run, then the loop
    /// returns. A panicking continuation is logged and does not stop the loop.
    pub fn run_loop(&self) -> Result<()> {
        let me = thread::current().id();
        if *self.inner.owner.get_or_init(|| me) != me {
            return Err(Error::AlreadyOwned(self.inner.id));
        }
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return Err(Error::ReentrantDrain(self.inner.id));
        }
        let _draining = DrainingGuard(&self.inner.draining);
        debug!(context = %self.inner.id, name = %self.inner.name, "run loop started");

        let mut executed: u64 = 0;
        while let Some(continuation) = self.next_continuation() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(continuation)) {
                error!(
                    context = %self.inner.id,
                    panic = %panic_message(payload.as_ref()),
                    "continuation panicked"
                );
            }
            executed += 1;
        }

        debug!(context = %self.inner.id, executed, "run loop stopped");
        Ok(())
    }

    fn next_continuation(&self) -> Option<Continuation> {
        let mut queue = self.inner.queue.lock();
        loop {
            if let Some(item) = queue.items.pop_front() {
                return Some(item);
            }
            if queue.closed {
                return None;
            }
            self.inner.ready.wait(&mut queue);
        }
    }

    /// Returns true if the calling thread is the owner of this context.
    #[must_use]
    pub fn current_thread_is_owner(&self) -> bool {
        self.inner
            .owner
            .get()
            .is_some_and(|owner| *owner == thread::current().id())
    }

    /// Stops accepting work and wakes the run loop. Idempotent.
    pub fn shutdown(&self) {
        let was_closed = {
            let mut queue = self.inner.queue.lock();
            std::mem::replace(&mut queue.closed, true)
        };
        self.inner.ready.notify_all();
        if !was_closed {
            debug!(context = %self.inner.id, "context shut down");
        }
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.queue.lock().closed
    }

    /// Number of continuations waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().items.len()
    }

    /// Creates a context and starts a dedicated OS thread running its loop.
    pub fn spawn_thread(name: impl Into<String>) -> Result<ContextThread> {
        ContextThread::spawn(name)
    }
}

impl PartialEq for AffinityContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for AffinityContext {}

impl fmt::Debug for AffinityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("owner", &self.inner.owner.get())
            .finish_non_exhaustive()
    }
}

struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An affinity context together with the OS thread that owns it.
///
/// Dropping the handle shuts the context down and joins the thread.
#[derive(Debug)]
pub struct ContextThread {
    context: AffinityContext,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ContextThread {
    /// Spawns a thread named `name` that runs the new context's loop.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let context = AffinityContext::new(name.clone());
        let looped = context.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || looped.run_loop())
            .map_err(|err| Error::spawn(&name, &err))?;
        Ok(Self {
            context,
            handle: Some(handle),
        })
    }

    /// Returns the context driven by this thread.
    #[must_use]
    pub fn context(&self) -> &AffinityContext {
        &self.context
    }

    /// Shuts the context down, lets the loop drain, and joins the thread.
    pub fn shutdown_and_join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        self.context.shutdown();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        match handle.join() {
            Ok(result) => result,
            Err(payload) => Err(Error::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

impl Drop for ContextThread {
    fn drop(&mut self) {
        if let Err(err) = self.join_inner() {
            error!(context = %self.context.id(), error = %err, "context thread failed");
        }
    }
}
