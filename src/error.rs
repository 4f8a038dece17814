//! Error types.
//!
//! Every observer of a terminal task sees the same error value, so [`Error`]
//! is `Clone`; user errors raised from task bodies are kept behind an `Arc`.

use crate::config::ConfigError;
use crate::types::ContextId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by contexts, tasks, waiters and resource guards.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A guarded resource was touched from a thread that does not own its context.
    #[error("resource `{resource}` accessed off its owning context {owner}")]
    AccessViolation {
        /// Name of the guarded resource.
        resource: String,
        /// Context that owns the resource.
        owner: ContextId,
    },
    /// Work was posted to a context after it was shut down.
    #[error("affinity context {0} is closed")]
    ContextClosed(ContextId),
    /// A bounded blocking wait expired before the task reached a terminal state.
    #[error("task did not complete within {waited:?}")]
    Timeout {
        /// How long the caller was blocked.
        waited: Duration,
    },
    /// The scheduler's worker pool or timer has been shut down.
    #[error("scheduler is shut down")]
    Shutdown,
    /// The task was cancelled before it completed.
    #[error("task cancelled")]
    Cancelled,
    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// `run_loop` was called from a thread other than the bound owner.
    #[error("affinity context {0} is already owned by another thread")]
    AlreadyOwned(ContextId),
    /// `run_loop` was called from inside one of the context's own continuations.
    #[error("affinity context {0} is already draining on this thread")]
    ReentrantDrain(ContextId),
    /// An OS thread could not be started.
    #[error("failed to spawn thread `{name}`: {message}")]
    Spawn {
        /// Thread name.
        name: String,
        /// OS error text.
        message: String,
    },
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An error returned by a task body.
    #[error(transparent)]
    Body(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wraps an arbitrary error raised from a task body.
    pub fn body<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Body(Arc::new(err))
    }

    /// Builds a [`Error::Spawn`] from an I/O error.
    pub(crate) fn spawn(name: &str, err: &std::io::Error) -> Self {
        Self::Spawn {
            name: name.to_owned(),
            message: err.to_string(),
        }
    }

    /// Returns true if this is an [`Error::AccessViolation`].
    #[must_use]
    pub const fn is_access_violation(&self) -> bool {
        matches!(self, Self::AccessViolation { .. })
    }

    /// Returns true if this is an [`Error::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is an [`Error::ContextClosed`].
    #[must_use]
    pub const fn is_context_closed(&self) -> bool {
        matches!(self, Self::ContextClosed(_))
    }

    /// Returns true if this is an [`Error::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts a panic payload into a readable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
