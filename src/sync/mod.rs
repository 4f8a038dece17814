//! Synchronous bridges onto asynchronous work.

pub mod waiter;

pub use waiter::BlockingWaiter;
