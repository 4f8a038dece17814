//! Timer driver thread.
//!
//! Deadlines are kept in a [`TimerHeap`]; the driver thread sleeps on a
//! condition variable until the earliest deadline (or until a new, earlier
//! timer is inserted) and runs expired callbacks outside the lock.
//!
//! Callbacks run on the timer thread and must stay short: delay tasks only
//! flip their state and dispatch continuations.

use crate::error::{Error, Result, panic_message};
use crate::runtime::timer::{TimerCallback, TimerHeap};
use crate::tracing_compat::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Default)]
struct DriverState {
    heap: TimerHeap,
    shutdown: bool,
}

struct Shared {
    state: Mutex<DriverState>,
    changed: Condvar,
}

/// Wall-clock timer service backed by one OS thread.
#[derive(Clone)]
pub struct TimerDriver {
    shared: Arc<Shared>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimerDriver {
    /// Starts the timer thread.
    pub fn start(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DriverState::default()),
            changed: Condvar::new(),
        });
        let driven = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || drive(&driven))
            .map_err(|err| Error::spawn(name, &err))?;
        Ok(Self {
            shared,
            handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Registers `callback` to run `after` from now.
    ///
    /// After shutdown the callback is invoked immediately with `false` and
    /// [`Error::Shutdown`] is returned.
    pub fn schedule<F>(&self, after: Duration, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let deadline = Instant::now() + after;
        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            callback(false);
            return Err(Error::Shutdown);
        }
        state.heap.insert(deadline, Box::new(callback));
        let pending = state.heap.len();
        drop(state);
        self.shared.changed.notify_one();
        trace!(after = ?after, pending, "timer scheduled");
        Ok(())
    }

    /// Number of timers not yet fired.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stops the thread. Outstanding timers are resolved with `false`.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.heap.drain()
        };
        self.shared.changed.notify_all();
        debug!(discarded = discarded.len(), "timer driver stopping");
        for callback in discarded {
            resolve(callback, false);
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TimerDriver")
            .field("heap", &state.heap)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn drive(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let due = state.heap.pop_expired(Instant::now());
        if !due.is_empty() {
            drop(state);
            for callback in due {
                resolve(callback, true);
            }
            state = shared.state.lock();
            continue;
        }
        match state.heap.peek_deadline() {
            Some(deadline) => {
                shared.changed.wait_until(&mut state, deadline);
            }
            None => shared.changed.wait(&mut state),
        }
    }
}

fn resolve(callback: TimerCallback, fired: bool) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(fired))) {
        error!(panic = %panic_message(payload.as_ref()), "timer callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::mpsc;

    #[test]
    fn fires_after_deadline_on_timer_thread() {
        init_test_logging();
        let driver = TimerDriver::start("test-timer").expect("start");
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        driver
            .schedule(Duration::from_millis(30), move |fired| {
                tx.send((fired, started.elapsed(), thread::current().id()))
                    .expect("send");
            })
            .expect("schedule");
        let (fired, elapsed, on) = rx.recv_timeout(Duration::from_secs(5)).expect("recv");
        assert!(fired);
        assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
        assert_ne!(on, thread::current().id());
        driver.shutdown();
    }

    #[test]
    fn earlier_timer_inserted_later_fires_first() {
        init_test_logging();
        let driver = TimerDriver::start("order-timer").expect("start");
        let (tx, rx) = mpsc::channel();
        let slow = tx.clone();
        driver
            .schedule(Duration::from_millis(300), move |_| {
                let _ = slow.send("slow");
            })
            .expect("schedule slow");
        driver
            .schedule(Duration::from_millis(10), move |_| {
                let _ = tx.send("fast");
            })
            .expect("schedule fast");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("recv"), "fast");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("recv"), "slow");
        driver.shutdown();
    }

    #[test]
    fn shutdown_resolves_outstanding_timers_as_not_fired() {
        init_test_logging();
        let driver = TimerDriver::start("stop-timer").expect("start");
        let (tx, rx) = mpsc::channel();
        let outstanding = tx.clone();
        driver
            .schedule(Duration::from_secs(3600), move |fired| {
                outstanding.send(fired).expect("send");
            })
            .expect("schedule");
        driver.shutdown();
        assert!(!rx.recv_timeout(Duration::from_secs(5)).expect("recv"));

        let err = driver
            .schedule(Duration::ZERO, move |fired| tx.send(fired).expect("send"))
            .expect_err("stopped");
        assert!(matches!(err, Error::Shutdown));
        assert!(!rx.recv_timeout(Duration::from_secs(5)).expect("recv"));
    }
}
