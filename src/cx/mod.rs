//! Task capability context.
//!
//! Every task body receives a [`Cx`]. It is the only way a body suspends, and
//! it carries the body's ambient affinity context explicitly instead of
//! reading it from thread-local state:
//!
//! - the ambient context starts as the one passed to
//!   [`Scheduler::spawn`](crate::runtime::Scheduler::spawn);
//! - a `CaptureContext` resumption keeps it;
//! - a `NoCapture` resumption runs on a worker and clears it, so later
//!   capturing suspensions in the same body fall back to the pool.

use crate::runtime::task::Lifecycle;
use crate::runtime::{AffinityContext, Scheduler, Suspend, Task};
use crate::types::{CaptureMode, TaskId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Capability context handed to a task body.
#[derive(Clone)]
pub struct Cx {
    scheduler: Scheduler,
    task: Arc<dyn Lifecycle>,
    ambient: Arc<Mutex<Option<AffinityContext>>>,
}

impl Cx {
    pub(crate) fn new(
        scheduler: Scheduler,
        task: Arc<dyn Lifecycle>,
        ambient: Option<AffinityContext>,
    ) -> Self {
        Self {
            scheduler,
            task,
            ambient: Arc::new(Mutex::new(ambient)),
        }
    }

    /// Identifier of the task running this body.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    /// The context the body is currently affine to, if any.
    #[must_use]
    pub fn ambient(&self) -> Option<AffinityContext> {
        self.ambient.lock().clone()
    }

    /// The scheduler the task runs under.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Suspends until `task` is terminal, resuming per `mode`.
    pub fn await_task<T>(&self, task: &Task<T>, mode: CaptureMode) -> Suspend<T> {
        let ambient = self.ambient();
        self.scheduler
            .await_on(task, mode, ambient.as_ref())
            .within(Arc::clone(&self.task), Arc::clone(&self.ambient))
    }

    /// Suspends for `duration`, resuming per `mode`.
    pub fn delay(&self, duration: Duration, mode: CaptureMode) -> Suspend<()> {
        let timer = self.scheduler.delay(duration);
        self.await_task(&timer, mode)
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task", &self.task.id())
            .field("ambient", &self.ambient.lock().as_ref().map(AffinityContext::id))
            .finish_non_exhaustive()
    }
}
