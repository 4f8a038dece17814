//! Task lifecycle state and capture mode.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// ```text
/// Pending ──▶ Running ──▶ Suspended ──▶ Running ──▶ … ──▶ RanToCompletion | Faulted
///    │           │            │
///    └───────────┴────────────┴──────▶ Cancelled
/// ```
///
/// The first terminal transition wins; later ones are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Created but not yet started.
    Pending,
    /// The body is executing between two suspension points.
    Running,
    /// Parked at a suspension point, waiting for its continuation to be scheduled.
    Suspended,
    /// Finished with a value.
    RanToCompletion,
    /// Finished with an error.
    Faulted,
    /// Cancelled before finishing.
    Cancelled,
}

impl TaskState {
    /// Returns true for `RanToCompletion`, `Faulted` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::RanToCompletion | Self::Faulted | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::RanToCompletion => "ran-to-completion",
            Self::Faulted => "faulted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Where the continuation after a suspension point runs.
///
/// Chosen per suspension point; a single body may mix both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// Resume on the ambient affinity context, if there is one.
    #[default]
    CaptureContext,
    /// Resume on a worker thread.
    NoCapture,
}

impl CaptureMode {
    /// Maps the familiar `continue_on_captured_context` flag onto a mode.
    #[must_use]
    pub const fn from_flag(capture: bool) -> Self {
        if capture {
            Self::CaptureContext
        } else {
            Self::NoCapture
        }
    }

    /// Returns true for [`CaptureMode::CaptureContext`].
    #[must_use]
    pub const fn captures(self) -> bool {
        matches!(self, Self::CaptureContext)
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaptureContext => f.write_str("capture-context"),
            Self::NoCapture => f.write_str("no-capture"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Suspended.is_terminal());
        assert!(TaskState::RanToCompletion.is_terminal());
        assert!(TaskState::Faulted.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn capture_flag_round_trips() {
        assert_eq!(CaptureMode::from_flag(true), CaptureMode::CaptureContext);
        assert_eq!(CaptureMode::from_flag(false), CaptureMode::NoCapture);
        assert!(CaptureMode::CaptureContext.captures());
        assert!(!CaptureMode::NoCapture.captures());
        assert_eq!(CaptureMode::default(), CaptureMode::CaptureContext);
    }
}
