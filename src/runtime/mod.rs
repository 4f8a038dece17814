//! Runtime: affinity contexts, tasks, suspension, and the scheduler.
//!
//! - [`affinity`]: single-threaded context with a FIFO continuation queue
//! - [`scheduler`]: timer + worker pool, `spawn`, `delay`, `await_on`
//! - [`task`]: task handles and their completion record
//! - [`suspend`]: the suspension future and its resume routing
//! - [`stored_task`]: type-erased task bodies and the runner that polls them
//! - [`timer`]: deadline heap used by the timer driver

pub mod affinity;
pub mod scheduler;
pub mod stored_task;
pub mod suspend;
pub mod task;
pub mod timer;

pub use affinity::{AffinityContext, ContextThread, Continuation};
pub use scheduler::{Scheduler, WorkerPool};
pub use stored_task::StoredTask;
pub use suspend::Suspend;
pub use task::Task;
pub use timer::TimerHeap;
