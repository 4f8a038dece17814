//! Blocking-wait scenarios.
//!
//! Each scenario starts a fresh scheduler and a dedicated affinity context
//! thread (the "UI thread"), then posts a test body onto that thread. The body
//! starts [`process_task`] and blocks on it with a bounded
//! [`BlockingWaiter`], exactly as a UI test that calls a synchronous wait on
//! async work would. The outcome is classified as completed, faulted, or
//! timed out.
//!
//! | scenario | capture | UI access | outcome |
//! |---|---|---|---|
//! | [`Scenario::no_capture`] | `NoCapture` | no | completed |
//! | [`Scenario::no_capture_with_ui`] | `NoCapture` | yes | faulted, access violation |
//! | [`Scenario::capture`] | `CaptureContext` | no | timed out (deadlock) |

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::guard::ResourceGuard;
use crate::runtime::{AffinityContext, ContextThread, Scheduler, Task};
use crate::sync::BlockingWaiter;
use crate::tracing_compat::{debug, info};
use crate::types::CaptureMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Stand-in for a UI window: the resource only the context thread may touch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Window {
    presented: Vec<String>,
}

impl Window {
    /// Presents a view on top of the window.
    pub fn present(&mut self, view: impl Into<String>) {
        self.presented.push(view.into());
    }

    /// Views presented so far.
    #[must_use]
    pub fn presented(&self) -> &[String] {
        &self.presented
    }
}

/// One blocking-wait configuration.
///
/// Listed under `[[scenarios]]` in a harness config file, with the delay
/// written as `delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Label used in logs and reports.
    pub name: String,
    /// How long the task's delay lasts.
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub delay: Duration,
    /// Capture mode of the task's suspension point.
    #[serde(default)]
    pub capture: CaptureMode,
    /// Whether the task touches the window after resuming.
    #[serde(default)]
    pub access_ui: bool,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl Scenario {
    /// Does not capture, does not touch the UI: completes.
    #[must_use]
    pub fn no_capture(delay: Duration) -> Self {
        Self {
            name: "no-capture".to_owned(),
            delay,
            capture: CaptureMode::NoCapture,
            access_ui: false,
        }
    }

    /// Does not capture, touches the UI from a worker: access violation.
    #[must_use]
    pub fn no_capture_with_ui(delay: Duration) -> Self {
        Self {
            name: "no-capture-ui".to_owned(),
            delay,
            capture: CaptureMode::NoCapture,
            access_ui: true,
        }
    }

    /// Captures the UI context while its thread is blocked: deadlock.
    #[must_use]
    pub fn capture(delay: Duration) -> Self {
        Self {
            name: "capture".to_owned(),
            delay,
            capture: CaptureMode::CaptureContext,
            access_ui: false,
        }
    }

    /// The three scenarios, in the order they are usually run.
    #[must_use]
    pub fn standard_set(delay: Duration) -> Vec<Self> {
        vec![
            Self::no_capture(delay),
            Self::no_capture_with_ui(delay),
            Self::capture(delay),
        ]
    }
}

/// How a scenario's blocking wait ended.
#[derive(Debug, Clone)]
pub enum ScenarioOutcome {
    /// The wait returned the task's value.
    Completed {
        /// Time spent blocked.
        elapsed: Duration,
    },
    /// The wait returned the task's error.
    Faulted {
        /// The error the task faulted with.
        error: Error,
        /// Time spent blocked.
        elapsed: Duration,
    },
    /// The wait hit its bound.
    TimedOut {
        /// Time spent blocked.
        waited: Duration,
        /// Whether the blocked thread was holding the task's resume.
        deadlock_suspected: bool,
    },
}

impl ScenarioOutcome {
    /// True for [`ScenarioOutcome::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// True for [`ScenarioOutcome::TimedOut`].
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// The fault, if the task faulted.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Faulted { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { elapsed } => write!(f, "completed after {elapsed:?}"),
            Self::Faulted { error, elapsed } => {
                write!(f, "faulted after {elapsed:?}: {error}")
            }
            Self::TimedOut {
                waited,
                deadlock_suspected,
            } => {
                write!(f, "timed out after {waited:?}")?;
                if *deadlock_suspected {
                    f.write_str(" (deadlock)")?;
                }
                Ok(())
            }
        }
    }
}

/// The async helper every scenario blocks on: wait `delay`, resuming per
/// `capture`, then optionally present a view on the window.
pub fn process_task(
    scheduler: &Scheduler,
    ambient: Option<&AffinityContext>,
    window: Arc<ResourceGuard<Window>>,
    delay: Duration,
    capture: CaptureMode,
    access_ui: bool,
) -> Task<()> {
    scheduler.spawn(ambient, move |cx| async move {
        cx.delay(delay, capture).await?;
        info!(task = %cx.task_id(), "task awaited");
        if access_ui {
            window.access(|w| w.present("modal"))?;
        }
        Ok(())
    })
}

/// Runs scenarios against fresh scheduler/context pairs.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    /// Creates a harness after validating `config`.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The harness configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The three standard scenarios at the configured delay.
    #[must_use]
    pub fn standard_scenarios(&self) -> Vec<Scenario> {
        Scenario::standard_set(self.config.delay_duration())
    }

    /// The scenarios listed in the config, or the standard set if none are.
    #[must_use]
    pub fn configured_scenarios(&self) -> Vec<Scenario> {
        if self.config.scenarios.is_empty() {
            self.standard_scenarios()
        } else {
            self.config.scenarios.clone()
        }
    }

    /// Runs one scenario to its outcome.
    ///
    /// Tears the context thread down afterwards; in the deadlock case the
    /// stranded resume is drained then, so the task still finishes.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioOutcome> {
        info!(
            scenario = %scenario.name,
            delay = ?scenario.delay,
            capture = %scenario.capture,
            access_ui = scenario.access_ui,
            "running scenario"
        );
        let scheduler = Scheduler::new(self.config.scheduler.clone())?;
        let ui = match ContextThread::spawn(self.config.scheduler.context_name.clone()) {
            Ok(ui) => ui,
            Err(err) => {
                scheduler.shutdown();
                return Err(err);
            }
        };
        let ctx = ui.context().clone();
        let window = Arc::new(ResourceGuard::new("window", ctx.clone(), Window::default()));
        let waiter = BlockingWaiter::with_timeout(self.config.wait_timeout_duration());

        let (tx, rx) = mpsc::channel();
        let body = {
            let (scheduler, ctx, scenario) = (scheduler.clone(), ctx.clone(), scenario.clone());
            move || {
                let started = Instant::now();
                let task = process_task(
                    &scheduler,
                    Some(&ctx),
                    window,
                    scenario.delay,
                    scenario.capture,
                    scenario.access_ui,
                );
                let outcome = match waiter.wait(&task) {
                    Ok(()) => ScenarioOutcome::Completed {
                        elapsed: started.elapsed(),
                    },
                    Err(Error::Timeout { waited }) => ScenarioOutcome::TimedOut {
                        waited,
                        deadlock_suspected: BlockingWaiter::deadlock_suspected(&task),
                    },
                    Err(error) => ScenarioOutcome::Faulted {
                        error,
                        elapsed: started.elapsed(),
                    },
                };
                let _ = tx.send(outcome);
            }
        };

        let reported = ctx
            .post(body)
            .and_then(|()| {
                rx.recv()
                    .map_err(|_| Error::Panicked("scenario body did not report".to_owned()))
            });
        let joined = ui.shutdown_and_join();
        scheduler.shutdown();
        let outcome = reported?;
        joined?;
        info!(scenario = %scenario.name, outcome = %outcome, "scenario finished");
        Ok(outcome)
    }

    /// Runs every scenario in order.
    pub fn run_all(&self, scenarios: &[Scenario]) -> Result<Vec<(Scenario, ScenarioOutcome)>> {
        scenarios
            .iter()
            .map(|scenario| {
                let outcome = self.run(scenario)?;
                debug!(scenario = %scenario.name, "recorded outcome");
                Ok((scenario.clone(), outcome))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_covers_the_three_configurations() {
        let set = Scenario::standard_set(Duration::from_millis(5));
        let shapes: Vec<_> = set.iter().map(|s| (s.capture, s.access_ui)).collect();
        assert_eq!(
            shapes,
            vec![
                (CaptureMode::NoCapture, false),
                (CaptureMode::NoCapture, true),
                (CaptureMode::CaptureContext, false),
            ]
        );
    }

    #[test]
    fn outcome_display_marks_deadlock() {
        let outcome = ScenarioOutcome::TimedOut {
            waited: Duration::from_millis(10),
            deadlock_suspected: true,
        };
        assert!(outcome.to_string().ends_with("(deadlock)"));
        assert!(outcome.is_timed_out());
        assert!(outcome.error().is_none());
    }

    #[test]
    fn window_records_presented_views() {
        let mut window = Window::default();
        window.present("modal");
        assert_eq!(window.presented(), ["modal".to_owned()]);
    }

    #[test]
    fn configured_scenarios_fall_back_to_standard_set() {
        let harness = Harness::default();
        assert_eq!(harness.configured_scenarios(), harness.standard_scenarios());

        let custom = vec![Scenario::no_capture(Duration::from_millis(5))];
        let harness = Harness::new(HarnessConfig::default().scenarios(custom.clone()))
            .expect("valid");
        assert_eq!(harness.configured_scenarios(), custom);
    }

    #[test]
    fn harness_rejects_invalid_config() {
        let config = HarnessConfig::default().wait_timeout(Duration::from_millis(1));
        assert!(matches!(Harness::new(config), Err(Error::Config(_))));
    }
}
