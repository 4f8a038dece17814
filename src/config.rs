//! Configuration for the scheduler and the scenario harness.
//!
//! Both configs have defaults, builder-style setters, and `serde`
//! deserialization. With the `config-file` feature they can be loaded from
//! TOML:
//!
//! ```toml
//! delay_ms = 3000
//! wait_timeout_ms = 10000
//!
//! [scheduler]
//! worker_threads = 4
//! thread_prefix = "lockstep"
//! context_name = "ui"
//!
//! [[scenarios]]
//! name = "late-capture"
//! delay_ms = 500
//! capture = "capture-context"
//! access_ui = true
//! ```

use crate::harness::Scenario;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// The file could not be read.
    #[error("failed to read config {path}: {message}")]
    Io {
        /// Path that was read.
        path: String,
        /// OS error text.
        message: String,
    },
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Worker threads for non-capturing continuations.
    pub worker_threads: usize,
    /// Prefix for timer and worker thread names.
    pub thread_prefix: String,
    /// Name of the affinity context thread the harness starts.
    pub context_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            thread_prefix: "lockstep".to_owned(),
            context_name: "ui".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the worker thread count.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Sets the affinity context name.
    #[must_use]
    pub fn context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }

    /// Checks ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.context_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "context_name",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

/// Settings for running the blocking-wait scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Delay awaited by each scenario's task, in milliseconds.
    pub delay_ms: u64,
    /// Bound on the blocking wait, in milliseconds.
    pub wait_timeout_ms: u64,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Scenarios to run instead of the standard three. Empty means the
    /// standard set at `delay_ms`.
    pub scenarios: Vec<Scenario>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3_000,
            wait_timeout_ms: 10_000,
            scheduler: SchedulerConfig::default(),
            scenarios: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Sets the scenario delay.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay_ms = duration_millis(delay);
        self
    }

    /// Sets the blocking wait bound.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = duration_millis(timeout);
        self
    }

    /// Replaces the scheduler settings.
    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Replaces the configured scenario list.
    #[must_use]
    pub fn scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// The scenario delay.
    #[must_use]
    pub const fn delay_duration(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// The blocking wait bound.
    #[must_use]
    pub const fn wait_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Checks ranges. The wait bound must exceed the delay, otherwise even
    /// the non-capturing scenario would report a timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.wait_timeout_ms <= self.delay_ms {
            return Err(ConfigError::Invalid {
                field: "wait_timeout_ms",
                reason: format!("must exceed delay_ms ({})", self.delay_ms),
            });
        }
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "scenarios.name",
                    reason: "must not be empty".to_owned(),
                });
            }
            if self.wait_timeout_duration() <= scenario.delay {
                return Err(ConfigError::Invalid {
                    field: "scenarios.delay_ms",
                    reason: format!(
                        "scenario `{}` must wait less than wait_timeout_ms ({})",
                        scenario.name, self.wait_timeout_ms
                    ),
                });
            }
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    #[cfg(feature = "config-file")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
