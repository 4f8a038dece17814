//! Suspension points.
//!
//! A [`Suspend`] future parks the enclosing body until an awaited task is
//! terminal, then arranges for the body to be resumed on the route chosen by
//! its [`CaptureMode`]:
//!
//! - `CaptureContext` with an ambient context: the resume is `post`ed to that
//!   context and runs on its owner thread.
//! - otherwise: the resume is pushed to the worker pool.
//!
//! The resume is always dispatched, never run inline, even when the awaited
//! task was already terminal at the first poll. The suspension completes only
//! once its dispatched resume has actually run.

use super::affinity::AffinityContext;
use super::scheduler::WorkerPool;
use super::task::{Lifecycle, Task};
use crate::error::{Error, Result};
use crate::tracing_compat::{trace, warn};
use crate::types::CaptureMode;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

/// Where a resumed continuation runs.
#[derive(Clone, Debug)]
pub(crate) enum Route {
    Context(AffinityContext),
    Worker(WorkerPool),
}

impl Route {
    pub(crate) fn select(
        mode: CaptureMode,
        ambient: Option<&AffinityContext>,
        pool: &WorkerPool,
    ) -> Self {
        match (mode, ambient) {
            (CaptureMode::CaptureContext, Some(ctx)) => Self::Context(ctx.clone()),
            _ => Self::Worker(pool.clone()),
        }
    }

    pub(crate) fn context(&self) -> Option<&AffinityContext> {
        match self {
            Self::Context(ctx) => Some(ctx),
            Self::Worker(_) => None,
        }
    }

    pub(crate) fn dispatch<F>(&self, continuation: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Self::Context(ctx) => ctx.post(continuation),
            Self::Worker(pool) => pool.execute(continuation),
        }
    }
}

/// Resume bookkeeping shared with the dispatched continuation.
#[derive(Default)]
struct Resume {
    resumed: AtomicBool,
    failure: Mutex<Option<Error>>,
}

/// Future returned by [`Scheduler::await_on`](crate::runtime::Scheduler::await_on)
/// and [`Cx::await_task`](crate::cx::Cx::await_task).
///
/// Resolves to the awaited task's outcome. If the capturing route is closed
/// by the time the awaited task finishes, resolves to
/// [`Error::ContextClosed`] on the thread that finished it.
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend<T> {
    awaited: Task<T>,
    mode: CaptureMode,
    route: Route,
    owner: Option<Arc<dyn Lifecycle>>,
    ambient: Option<Arc<Mutex<Option<AffinityContext>>>>,
    resume: Arc<Resume>,
    registered: bool,
}

impl<T> Suspend<T> {
    pub(crate) fn new(awaited: Task<T>, mode: CaptureMode, route: Route) -> Self {
        Self {
            awaited,
            mode,
            route,
            owner: None,
            ambient: None,
            resume: Arc::new(Resume::default()),
            registered: false,
        }
    }

    /// Attaches the enclosing task's lifecycle and ambient-context cell.
    pub(crate) fn within(
        mut self,
        owner: Arc<dyn Lifecycle>,
        ambient: Arc<Mutex<Option<AffinityContext>>>,
    ) -> Self {
        self.owner = Some(owner);
        self.ambient = Some(ambient);
        self
    }

    /// The capture mode of this suspension point.
    #[must_use]
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// The context the continuation will be posted to, if it captures one.
    #[must_use]
    pub fn captured_context(&self) -> Option<&AffinityContext> {
        self.route.context()
    }

    fn mark_suspended(&self) {
        if let Some(owner) = &self.owner {
            owner.mark_suspended(self.route.context().cloned());
        }
    }

    fn register(&self, cx: &Context<'_>) {
        self.mark_suspended();
        let waker = cx.waker().clone();
        let fallback = waker.clone();
        let route = self.route.clone();
        let resume = Arc::clone(&self.resume);
        let awaited = self.awaited.id();
        self.awaited.core.on_terminal(Box::new(move || {
            let signal = Arc::clone(&resume);
            let dispatched = route.dispatch(move || {
                signal.resumed.store(true, Ordering::Release);
                waker.wake();
            });
            if let Err(err) = dispatched {
                warn!(awaited = %awaited, error = %err, "resume could not be dispatched");
                *resume.failure.lock() = Some(err);
                resume.resumed.store(true, Ordering::Release);
                fallback.wake();
            }
        }));
        trace!(awaited = %awaited, mode = %self.mode, "suspended");
    }

    fn settle_ambient(&self, failed: bool) {
        if let Some(cell) = &self.ambient {
            *cell.lock() = if failed {
                None
            } else {
                self.route.context().cloned()
            };
        }
    }
}

impl<T: Clone> Future for Suspend<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.registered {
            this.registered = true;
            this.register(cx);
            return Poll::Pending;
        }
        if !this.resume.resumed.load(Ordering::Acquire) {
            this.mark_suspended();
            return Poll::Pending;
        }
        if let Some(err) = this.resume.failure.lock().take() {
            this.settle_ambient(true);
            return Poll::Ready(Err(err));
        }
        this.settle_ambient(false);
        match this.awaited.core.try_outcome() {
            Some(outcome) => Poll::Ready(outcome),
            // Unreachable in practice: resumes are only dispatched after the
            // terminal transition publishes the outcome.
            None => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Suspend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspend")
            .field("awaited", &self.awaited.id())
            .field("mode", &self.mode)
            .field("route", &self.route)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}
