//! Time primitives.
//!
//! The [`TimerDriver`] owns a dedicated thread that fires deadline callbacks;
//! [`Scheduler::delay`](crate::runtime::Scheduler::delay) builds delay tasks on
//! top of it.

pub mod driver;

pub use driver::TimerDriver;
