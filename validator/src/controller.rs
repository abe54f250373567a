//! Sequential run controller.
//!
//! Fixtures run strictly one after another: the engine and the shared
//! display are not safe under concurrent invocation. Each fixture yields
//! exactly one [`ExecutionResult`]; the run stops early only when the
//! classifier reports an environment failure and the policy says to abort.

use crate::classifier::OutcomeClassifier;
use crate::outcome::{ExecutionResult, Status};
use engine::{Fixture, FixtureExecutor};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-fixture timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do once an environment failure is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentPolicy {
    /// Stop: every remaining fixture would fail the same way
    #[default]
    Abort,
    /// Keep running the remaining fixtures
    Continue,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub timeout: Duration,
    pub environment_policy: EnvironmentPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            environment_policy: EnvironmentPolicy::Abort,
        }
    }
}

/// Why the run stopped before the last fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyAbort {
    /// Fixture that confirmed the environment failure
    pub fixture: String,
    pub message: String,
    /// Fixtures left unattempted
    pub remaining: usize,
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub discovered: usize,
    /// One entry per attempted fixture, in discovery order
    pub results: Vec<ExecutionResult>,
    pub aborted: Option<EarlyAbort>,
}

/// Receives run progress events.
///
/// Implement this to change how progress is presented.
pub trait ProgressReporter {
    fn on_run_start(&mut self, _total: usize) {}

    /// Called after each result is recorded; `index` starts at 1
    fn on_result(&mut self, index: usize, total: usize, result: &ExecutionResult);

    fn on_abort(&mut self, _abort: &EarlyAbort) {}
}

/// Reporter that prints nothing
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn on_result(&mut self, _index: usize, _total: usize, _result: &ExecutionResult) {}
}

/// Console reporter: one line per fixture with a colored status marker
pub struct ConsoleProgress<W: Write> {
    out: W,
    verbose: bool,
    /// Print display setup options after an early abort
    display_hints: bool,
}

impl ConsoleProgress<std::io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(std::io::stdout(), verbose)
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            display_hints: true,
        }
    }

    pub fn with_display_hints(mut self, enabled: bool) -> Self {
        self.display_hints = enabled;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn marker(status: Status) -> &'static str {
        match status {
            Status::Pass => "\x1b[92m+\x1b[0m",
            Status::Fail => "\x1b[91m-\x1b[0m",
            Status::Timeout => "\x1b[93mT\x1b[0m",
            Status::Error => "\x1b[91m!\x1b[0m",
        }
    }
}

impl<W: Write> ProgressReporter for ConsoleProgress<W> {
    fn on_run_start(&mut self, total: usize) {
        let _ = writeln!(self.out, "Found {} fixtures to validate\n", total);
    }

    fn on_result(&mut self, index: usize, total: usize, result: &ExecutionResult) {
        let progress = format!("[{}/{}]", index, total);
        let _ = writeln!(
            self.out,
            "{:10} {} {}",
            progress,
            Self::marker(result.status),
            result.file
        );

        if self.verbose && !result.status.is_pass() && !result.message().is_empty() {
            let detail: String = result.message().chars().take(200).collect();
            let _ = writeln!(self.out, "           Error: {}", detail);
        }
    }

    fn on_abort(&mut self, abort: &EarlyAbort) {
        let rule = "=".repeat(60);
        let _ = writeln!(self.out, "\n{}", rule);
        let _ = writeln!(self.out, "ERROR: Environment cannot run the engine");
        let _ = writeln!(self.out, "{}", rule);
        let _ = writeln!(self.out, "{}", abort.message);
        let _ = writeln!(
            self.out,
            "Stopped after {}; {} fixtures not attempted.",
            abort.fixture, abort.remaining
        );
        if !self.display_hints {
            return;
        }
        let _ = writeln!(self.out, "\nOptions:");
        let _ = writeln!(
            self.out,
            "  1. Wrap each run in xvfb-run: validate-fixtures --use-xvfb"
        );
        let _ = writeln!(
            self.out,
            "  2. Start one Xvfb for the run: validate-fixtures --start-xvfb"
        );
        let _ = writeln!(self.out, "  3. Start Xvfb manually:");
        let _ = writeln!(self.out, "     Xvfb :99 -screen 0 1024x768x24 &");
        let _ = writeln!(self.out, "     export DISPLAY=:99");
        let _ = writeln!(self.out, "     validate-fixtures");
    }
}

/// Drives executor and classifier over the discovered fixtures
pub struct RunController<E, C> {
    executor: E,
    classifier: C,
    settings: RunSettings,
}

impl<E: FixtureExecutor, C: OutcomeClassifier> RunController<E, C> {
    pub fn new(executor: E, classifier: C, settings: RunSettings) -> Self {
        Self {
            executor,
            classifier,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run every fixture once, in order
    pub async fn run(
        &self,
        fixtures: &[Fixture],
        progress: &mut dyn ProgressReporter,
    ) -> RunOutcome {
        let total = fixtures.len();
        info!(
            "Validating {} fixtures with {} executor (timeout {:?})",
            total,
            self.executor.executor_name(),
            self.settings.timeout
        );
        progress.on_run_start(total);

        let mut results = Vec::with_capacity(total);
        let mut aborted = None;

        for (position, fixture) in fixtures.iter().enumerate() {
            let raw = self.executor.run(fixture, self.settings.timeout).await;
            let classification = self.classifier.classify(&raw);

            let result = ExecutionResult::new(
                fixture,
                classification.status,
                raw.return_code,
                raw.stdout,
                classification.message,
                raw.duration,
            );

            match result.status {
                Status::Pass => info!("{} passed in {:?}", result.file, result.duration),
                Status::Fail => warn!("{} failed: {}", result.file, result.message()),
                Status::Timeout => warn!("{}: {}", result.file, result.message()),
                Status::Error => error!("{} errored: {}", result.file, result.message()),
            }

            results.push(result);
            let index = position + 1;
            progress.on_result(index, total, &results[position]);

            if classification.environment_failure {
                match self.settings.environment_policy {
                    EnvironmentPolicy::Abort => {
                        let abort = EarlyAbort {
                            fixture: fixture.id.clone(),
                            message: results[position].message().to_string(),
                            remaining: total - index,
                        };
                        error!(
                            "Environment failure at {}, skipping {} remaining fixtures",
                            abort.fixture, abort.remaining
                        );
                        progress.on_abort(&abort);
                        aborted = Some(abort);
                        break;
                    }
                    EnvironmentPolicy::Continue => {
                        warn!(
                            "Environment failure at {}, continuing by policy",
                            fixture.id
                        );
                    }
                }
            }
        }

        RunOutcome {
            discovered: total,
            results,
            aborted,
        }
    }
}
