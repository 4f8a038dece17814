//! Scheduler: timers, worker pool, spawning and suspension.
//!
//! The scheduler owns a [`TimerDriver`] and a [`WorkerPool`]. It never owns an
//! affinity context: contexts are supplied by the host and passed explicitly
//! wherever a continuation may capture one.

pub mod global_queue;
pub mod worker_pool;

pub use global_queue::{GlobalQueue, Job};
pub use worker_pool::WorkerPool;

use super::affinity::AffinityContext;
use super::stored_task::{Runner, StoredTask};
use super::suspend::{Route, Suspend};
use super::task::{Task, TaskCore};
use crate::config::SchedulerConfig;
use crate::cx::Cx;
use crate::error::{Error, Result, panic_message};
use crate::time::TimerDriver;
use crate::tracing_compat::{debug, info, trace};
use crate::types::{CaptureMode, TaskState};
use futures_lite::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    config: SchedulerConfig,
    pool: WorkerPool,
    timer: TimerDriver,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timer.shutdown();
        self.pool.shutdown();
    }
}

/// Handle to the timer and worker pool that back every task.
///
/// Cloning is cheap. Tasks hold clones through their [`Cx`], so dropping the
/// last handle only stops the threads once no task body is alive; call
/// [`shutdown`](Self::shutdown) to stop them deterministically.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Validates `config`, then starts the timer thread and
    /// `config.worker_threads` workers.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let timer = TimerDriver::start(&format!("{}-timer", config.thread_prefix))?;
        let pool = match WorkerPool::start(
            config.worker_threads,
            &format!("{}-worker", config.thread_prefix),
        ) {
            Ok(pool) => pool,
            Err(err) => {
                timer.shutdown();
                return Err(err);
            }
        };
        info!(
            workers = config.worker_threads,
            prefix = %config.thread_prefix,
            "scheduler started"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pool,
                timer,
            }),
        })
    }

    /// Returns the configuration the scheduler was started with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Returns a task that is `Suspended` immediately and completes after
    /// `duration`, on the timer thread.
    ///
    /// If the scheduler is shut down before the deadline the task is
    /// cancelled.
    pub fn delay(&self, duration: Duration) -> Task<()> {
        let core = TaskCore::<()>::new(TaskState::Suspended);
        let timed = Arc::clone(&core);
        let scheduled = self.inner.timer.schedule(duration, move |fired| {
            if fired {
                timed.complete(Ok(()));
            } else {
                timed.cancel();
            }
        });
        if scheduled.is_err() {
            debug!(task = %core.id(), "delay requested after shutdown");
        }
        trace!(task = %core.id(), duration = ?duration, "delay started");
        Task::from_core(core)
    }

    /// The suspension primitive.
    ///
    /// The returned future completes with `task`'s outcome. Its continuation
    /// is posted to `ambient` when `mode` is [`CaptureMode::CaptureContext`]
    /// and an ambient context is given, otherwise it runs on a worker. The
    /// continuation runs at most once and is never run inline.
    ///
    /// The future is not tied to the task that awaits it: that task does not
    /// move to `Suspended` or record a captured context, and no ambient
    /// context is carried past the resume. Inside a body, use
    /// [`Cx::await_task`], which does all three.
    pub fn await_on<T>(
        &self,
        task: &Task<T>,
        mode: CaptureMode,
        ambient: Option<&AffinityContext>,
    ) -> Suspend<T> {
        Suspend::new(task.clone(), mode, Route::select(mode, ambient, &self.inner.pool))
    }

    /// Starts an async body on the calling thread.
    ///
    /// The body runs synchronously up to its first suspension point, then the
    /// task is returned. `ambient` is the context the body starts on; it is the
    /// context that capturing suspension points post back to.
    ///
    /// An `Err` returned by the body or a panic inside it faults the task.
    pub fn spawn<T, F, Fut>(&self, ambient: Option<&AffinityContext>, body: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let core = TaskCore::<T>::new(TaskState::Pending);
        let cx = Cx::new(self.clone(), core.clone(), ambient.cloned());
        let future = body(cx);
        let completer = Arc::clone(&core);
        let wrapped = async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(Error::Panicked(panic_message(payload.as_ref()))),
            };
            completer.complete(outcome);
        };
        debug!(
            task = %core.id(),
            ambient = ?ambient.map(AffinityContext::id),
            "task spawned"
        );
        let runner = Runner::new(StoredTask::new(wrapped), core.clone());
        runner.run();
        Task::from_core(core)
    }

    /// Queues a closure on the worker pool.
    pub fn run_on_worker<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.pool.execute(job)
    }

    /// Stops the timer and the workers. Idempotent.
    ///
    /// Pending delays are cancelled; jobs already queued on the pool still run.
    pub fn shutdown(&self) {
        self.inner.timer.shutdown();
        self.inner.pool.shutdown();
        debug!("scheduler shut down");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("timer", &self.inner.timer)
            .finish()
    }
}
