//! Core types shared by the scheduler, tasks and waiters.
//!
//! - [`id`]: Identifier types (`TaskId`, `ContextId`)
//! - [`state`]: Task lifecycle state and per-suspension capture mode

pub mod id;
pub mod state;

pub use id::{ContextId, TaskId};
pub use state::{CaptureMode, TaskState};
