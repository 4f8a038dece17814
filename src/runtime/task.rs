//! Task handles and their shared completion record.
//!
//! A [`Task`] is a handle to a [`TaskCore`]: lifecycle state, the context
//! captured at the latest suspension, the result-or-error slot, and the
//! continuations to run on the terminal transition. The slot is guarded by one
//! mutex; a condition variable signalled on the terminal transition lets
//! blocking waiters sleep without polling.

use super::affinity::{AffinityContext, Continuation};
use crate::error::{Error, Result};
use crate::tracing_compat::{debug, trace};
use crate::types::{TaskId, TaskState};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

struct Slot<T> {
    state: TaskState,
    outcome: Option<Result<T>>,
    continuations: Vec<Continuation>,
    captured: Option<AffinityContext>,
}

pub(crate) struct TaskCore<T> {
    id: TaskId,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

impl<T> TaskCore<T> {
    pub(crate) fn new(state: TaskState) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            slot: Mutex::new(Slot {
                state,
                outcome: None,
                continuations: Vec::new(),
                captured: None,
            }),
            done: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        self.slot.lock().state
    }

    pub(crate) fn captured(&self) -> Option<AffinityContext> {
        self.slot.lock().captured.clone()
    }

    /// Moves a live task to `Running`. No effect once terminal.
    pub(crate) fn mark_running(&self) {
        let mut slot = self.slot.lock();
        if !slot.state.is_terminal() {
            slot.state = TaskState::Running;
        }
    }

    /// Moves a live task to `Suspended`, recording the captured context.
    pub(crate) fn mark_suspended(&self, captured: Option<AffinityContext>) {
        let mut slot = self.slot.lock();
        if !slot.state.is_terminal() {
            slot.state = TaskState::Suspended;
            slot.captured = captured;
        }
    }

    /// Records the outcome. Returns false if the task was already terminal.
    pub(crate) fn complete(&self, outcome: Result<T>) -> bool {
        let state = if outcome.is_ok() {
            TaskState::RanToCompletion
        } else {
            TaskState::Faulted
        };
        self.finish(state, outcome)
    }

    /// Cancels a live task. Returns false if it was already terminal.
    pub(crate) fn cancel(&self) -> bool {
        self.finish(TaskState::Cancelled, Err(Error::Cancelled))
    }

    fn finish(&self, state: TaskState, outcome: Result<T>) -> bool {
        let continuations = {
            let mut slot = self.slot.lock();
            if slot.state.is_terminal() {
                return false;
            }
            slot.state = state;
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.continuations)
        };
        self.done.notify_all();
        debug!(
            task = %self.id,
            state = %state,
            continuations = continuations.len(),
            "task reached terminal state"
        );
        for continuation in continuations {
            continuation();
        }
        true
    }

    /// Runs `continuation` once the task is terminal: now if it already is,
    /// otherwise from the thread performing the terminal transition.
    pub(crate) fn on_terminal(&self, continuation: Continuation) {
        {
            let mut slot = self.slot.lock();
            if !slot.state.is_terminal() {
                slot.continuations.push(continuation);
                trace!(task = %self.id, "continuation registered");
                return;
            }
        }
        continuation();
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.slot.lock().state.is_terminal()
    }
}

impl<T: Clone> TaskCore<T> {
    pub(crate) fn try_outcome(&self) -> Option<Result<T>> {
        self.slot.lock().outcome.clone()
    }

    /// Blocks until terminal, or until `deadline` passes (returns `None`).
    pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> Option<Result<T>> {
        let mut slot = self.slot.lock();
        while !slot.state.is_terminal() {
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut slot, deadline).timed_out()
                        && !slot.state.is_terminal()
                    {
                        return None;
                    }
                }
                None => self.done.wait(&mut slot),
            }
        }
        slot.outcome.clone()
    }
}

/// Type-erased view of a task used by the runner and by [`Cx`](crate::cx::Cx).
pub(crate) trait Lifecycle: Send + Sync {
    fn id(&self) -> TaskId;
    fn mark_running(&self);
    fn mark_suspended(&self, captured: Option<AffinityContext>);
    fn is_terminal(&self) -> bool;
}

impl<T: Send> Lifecycle for TaskCore<T> {
    fn id(&self) -> TaskId {
        TaskCore::id(self)
    }

    fn mark_running(&self) {
        TaskCore::mark_running(self);
    }

    fn mark_suspended(&self, captured: Option<AffinityContext>) {
        TaskCore::mark_suspended(self, captured);
    }

    fn is_terminal(&self) -> bool {
        TaskCore::is_terminal(self)
    }
}

/// Handle to an asynchronous unit of work producing `T`.
///
/// Handles are cheap to clone; every clone observes the same terminal state.
pub struct Task<T> {
    pub(crate) core: Arc<TaskCore<T>>,
}

impl<T> Task<T> {
    pub(crate) fn from_core(core: Arc<TaskCore<T>>) -> Self {
        Self { core }
    }

    /// Returns the task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Returns true once the task has completed, faulted or been cancelled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.core.is_terminal()
    }

    /// The context captured at the task's most recent suspension point.
    #[must_use]
    pub fn captured_context(&self) -> Option<AffinityContext> {
        self.core.captured()
    }

    /// Cancels the task if it has not finished.
    ///
    /// Waiters observe [`Error::Cancelled`]; the body is dropped without being
    /// resumed. Returns false if the task was already terminal.
    pub fn cancel(&self) -> bool {
        self.core.cancel()
    }
}

impl<T: Clone> Task<T> {
    /// Returns the outcome without blocking, if the task is terminal.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T>> {
        self.core.try_outcome()
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn first_terminal_transition_wins() {
        let core = TaskCore::<u32>::new(TaskState::Suspended);
        assert!(core.complete(Ok(7)));
        assert!(!core.complete(Ok(8)));
        assert!(!core.cancel());
        let task = Task::from_core(core);
        assert_eq!(task.state(), TaskState::RanToCompletion);
        assert_eq!(task.try_result().expect("terminal").expect("ok"), 7);
    }

    #[test]
    fn error_outcome_faults() {
        let core = TaskCore::<()>::new(TaskState::Running);
        core.complete(Err(Error::Panicked("x".into())));
        assert_eq!(core.state(), TaskState::Faulted);
    }

    #[test]
    fn continuations_run_exactly_once() {
        let core = TaskCore::<()>::new(TaskState::Suspended);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            core.on_terminal(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        core.complete(Ok(()));
        core.complete(Ok(()));
        core.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let late = Arc::clone(&hits);
        core.on_terminal(Box::new(move || {
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn terminal_state_is_sticky_for_lifecycle_marks() {
        let core = TaskCore::<()>::new(TaskState::Pending);
        core.mark_running();
        assert_eq!(core.state(), TaskState::Running);
        core.cancel();
        core.mark_running();
        core.mark_suspended(None);
        assert_eq!(core.state(), TaskState::Cancelled);
    }

    #[test]
    fn wait_until_times_out_then_observes_completion() {
        let core = TaskCore::<u8>::new(TaskState::Suspended);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(core.wait_until(Some(deadline)).is_none());

        let completer = Arc::clone(&core);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            completer.complete(Ok(5));
        });
        let outcome = core.wait_until(None).expect("terminal");
        assert_eq!(outcome.expect("ok"), 5);
        handle.join().expect("completer");
    }
}
