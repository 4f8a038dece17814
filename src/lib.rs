//! Lockstep: a context-affine task scheduler that makes sync-over-async
//! deadlocks reproducible.
//!
//! # Overview
//!
//! An [`AffinityContext`] is a single-threaded execution domain, the way a UI
//! thread is: one owner thread drains a FIFO queue of continuations. Tasks
//! started by the [`Scheduler`] suspend at explicit points and choose, per
//! suspension point, whether to resume on the ambient context
//! ([`CaptureMode::CaptureContext`]) or on a worker
//! ([`CaptureMode::NoCapture`]). A [`BlockingWaiter`] blocks a thread until a
//! task finishes. A [`ResourceGuard`] rejects access from anything but its
//! owning context's thread.
//!
//! Blocking the owner thread on a task whose resume is queued on that same
//! owner is a deadlock; the [`harness`] runs that case and its two neighbours
//! and classifies each as completed, faulted, or timed out.
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers, task state, capture mode
//! - [`runtime`]: Affinity context, scheduler, tasks, suspension
//! - [`cx`]: Capability context handed to task bodies
//! - [`time`]: Timer driver
//! - [`sync`]: Blocking waiter
//! - [`guard`]: Context-affine resources
//! - [`config`]: Scheduler and harness configuration
//! - [`harness`]: The three blocking-wait scenarios
//! - [`error`](mod@error): Error types
//!
//! # Example
//!
//! ```no_run
//! use lockstep::{BlockingWaiter, CaptureMode, Scheduler, SchedulerConfig};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! let task = scheduler.spawn(None, |cx| async move {
//!     cx.delay(Duration::from_millis(10), CaptureMode::NoCapture).await?;
//!     Ok(7)
//! });
//! assert_eq!(BlockingWaiter::new().wait(&task)?, 7);
//! scheduler.shutdown();
//! # Ok::<(), lockstep::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![cfg_attr(not(feature = "tracing-integration"), allow(unused_variables))]

pub mod config;
pub mod cx;
pub mod error;
pub mod guard;
pub mod harness;
pub mod runtime;
pub mod sync;
pub mod time;
pub mod types;

pub(crate) mod tracing_compat;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use config::{ConfigError, HarnessConfig, SchedulerConfig};
pub use cx::Cx;
pub use error::{Error, Result};
pub use guard::ResourceGuard;
pub use harness::{Harness, Scenario, ScenarioOutcome, Window};
pub use runtime::{AffinityContext, ContextThread, Scheduler, Suspend, Task};
pub use sync::BlockingWaiter;
pub use types::{CaptureMode, ContextId, TaskId, TaskState};
