//! Scenario runner.
//!
//! Runs the blocking-wait scenarios on a fresh affinity context and prints
//! one line per outcome. Exit status is non-zero when an outcome differs from
//! the one the scenario is expected to produce.

use clap::{Parser, ValueEnum};
use lockstep::{Harness, HarnessConfig, Scenario, ScenarioOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Which {
    /// No capture, no UI access: completes.
    NoCapture,
    /// No capture, UI access from a worker: access violation.
    NoCaptureUi,
    /// Capture the blocked UI context: deadlock, reported as a timeout.
    Capture,
    /// Every scenario listed in the config file, else all three.
    All,
}

#[derive(Debug, Parser)]
#[command(name = "lockstep", version, about = "Reproduce sync-over-async outcomes on an affinity context")]
struct Args {
    /// Scenario to run.
    #[arg(long, value_enum, default_value_t = Which::All)]
    scenario: Which,
    /// TOML config file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Delay awaited by the task, in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Bound on the blocking wait, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Worker thread count.
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lockstep=info")),
        )
        .with_thread_names(true)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("lockstep: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> lockstep::Result<bool> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(delay) = args.delay_ms {
        config.delay_ms = delay;
    }
    if let Some(timeout) = args.timeout_ms {
        config.wait_timeout_ms = timeout;
    }
    if let Some(workers) = args.workers {
        config.scheduler.worker_threads = workers;
    }

    let harness = Harness::new(config)?;
    let scenarios = selected(&harness, args.scenario);

    let mut all_expected = true;
    for (scenario, outcome) in harness.run_all(&scenarios)? {
        let expected = matches_expectation(&scenario, &outcome);
        all_expected &= expected;
        println!(
            "{:<14} capture={:<16} ui={:<5} -> {}{}",
            scenario.name,
            scenario.capture.to_string(),
            scenario.access_ui,
            outcome,
            if expected { "" } else { "  [unexpected]" }
        );
    }
    Ok(all_expected)
}

fn selected(harness: &Harness, which: Which) -> Vec<Scenario> {
    let delay = harness.config().delay_duration();
    match which {
        Which::NoCapture => vec![Scenario::no_capture(delay)],
        Which::NoCaptureUi => vec![Scenario::no_capture_with_ui(delay)],
        Which::Capture => vec![Scenario::capture(delay)],
        Which::All => harness.configured_scenarios(),
    }
}

fn matches_expectation(scenario: &Scenario, outcome: &ScenarioOutcome) -> bool {
    match (scenario.capture.captures(), scenario.access_ui) {
        (true, _) => outcome.is_timed_out(),
        (false, true) => outcome.error().is_some_and(lockstep::Error::is_access_violation),
        (false, false) => outcome.is_completed(),
    }
}
