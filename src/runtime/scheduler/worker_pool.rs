//! Worker threads for continuations that do not capture a context.
//!
//! Jobs land in the [`GlobalQueue`]; idle workers park on a condition
//! variable and are woken one per push.

use super::global_queue::{GlobalQueue, Job};
use crate::error::{Error, Result, panic_message};
use crate::tracing_compat::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Shared {
    queue: GlobalQueue,
    shutdown: Mutex<bool>,
    available: Condvar,
}

/// Handle to a fixed set of worker threads fed by an unbounded queue.
///
/// Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Starts `threads` workers named `{prefix}-{n}`.
    pub fn start(threads: usize, prefix: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: GlobalQueue::new(),
            shutdown: Mutex::new(false),
            available: Condvar::new(),
        });
        let pool = Self {
            shared,
            handles: Arc::new(Mutex::new(Vec::with_capacity(threads))),
        };
        for n in 0..threads {
            let name = format!("{prefix}-{n}");
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(err) => {
                    pool.shutdown();
                    return Err(Error::spawn(&name, &err));
                }
            }
        }
        debug!(threads, "worker pool started");
        Ok(pool)
    }

    /// Queues a job. Fails with [`Error::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let stopped = self.shared.shutdown.lock();
        if *stopped {
            return Err(Error::Shutdown);
        }
        self.shared.queue.push(Box::new(job));
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of jobs not yet picked up by a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Number of worker threads still attached to the pool.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.handles.lock().len()
    }

    /// Stops the workers after the queue is drained and joins them.
    ///
    /// Idempotent. A worker calling this does not join itself.
    pub fn shutdown(&self) {
        {
            let mut stopped = self.shared.shutdown.lock();
            if *stopped {
                return;
            }
            *stopped = true;
        }
        self.shared.available.notify_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread panicked outside a job");
            }
        }
        debug!("worker pool stopped");
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queued", &self.shared.queue.len())
            .field("threads", &self.handles.lock().len())
            .finish()
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        if let Some(job) = shared.queue.pop() {
            run_job(job);
            continue;
        }
        let mut stopped = shared.shutdown.lock();
        if !shared.queue.is_empty() {
            continue;
        }
        if *stopped {
            return;
        }
        shared.available.wait(&mut stopped);
    }
}

fn run_job(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        error!(panic = %panic_message(payload.as_ref()), "worker job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn jobs_run_off_the_calling_thread() {
        init_test_logging();
        let pool = WorkerPool::start(2, "test-worker").expect("start");
        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(thread::current().id()).expect("send"))
            .expect("execute");
        let ran_on = rx.recv_timeout(Duration::from_secs(5)).expect("recv");
        assert_ne!(ran_on, thread::current().id());
        pool.shutdown();
    }

    #[test]
    fn shutdown_drains_queue_then_rejects() {
        init_test_logging();
        let pool = WorkerPool::start(1, "drain-worker").expect("start");
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let hits = Arc::clone(&hits);
            pool.execute(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .expect("execute");
        }
        pool.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 50);
        assert!(matches!(pool.execute(|| {}), Err(Error::Shutdown)));
        assert_eq!(pool.threads(), 0);
        pool.shutdown();
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        init_test_logging();
        let pool = WorkerPool::start(1, "panic-worker").expect("start");
        pool.execute(|| panic!("job failure")).expect("execute");
        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(()).expect("send"))
            .expect("execute");
        rx.recv_timeout(Duration::from_secs(5))
            .expect("worker survived the panic");
        pool.shutdown();
    }
}
