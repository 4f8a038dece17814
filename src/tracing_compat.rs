//! Optional tracing integration.
//!
//! With the `tracing-integration` feature the event macros below forward to
//! [`tracing`]. Without it they expand to nothing and their arguments are not
//! evaluated, so instrumented hot paths cost nothing.

#[cfg(feature = "tracing-integration")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
macro_rules! noop_event {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing-integration"))]
pub(crate) use {
    noop_event as debug, noop_event as error, noop_event as info, noop_event as trace,
    noop_event as warn,
};
