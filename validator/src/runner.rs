//! End-to-end validation run: discovery, display, preflight, execution.

use crate::config::{ConfigResult, ValidatorConfig};
use crate::controller::{ProgressReporter, RunController};
use crate::discovery::discover;
use crate::report::Report;
use engine::ProcessExecutor;
use tracing::{info, warn};

/// Run every discovered fixture and build the report.
///
/// `existing_display` is the display already configured for the harness,
/// normally [`display::display_from_env`]. Setup problems (missing root, no
/// display, engine not installed) are returned as errors before any fixture
/// runs. A provisioned display server lives exactly as long as this future:
/// it is released on completion and torn down if the future is dropped.
pub async fn run_validation(
    config: &ValidatorConfig,
    existing_display: Option<String>,
    progress: &mut dyn ProgressReporter,
) -> ConfigResult<Report> {
    let fixtures = discover(&config.root, &config.extension)?;
    info!(
        "Found {} .{} fixtures under {}",
        fixtures.len(),
        config.extension.trim_start_matches('.'),
        config.root.display()
    );

    let guard = display::acquire(config.display_mode, &config.display, existing_display).await?;

    let engine = config
        .engine
        .clone()
        .with_display(guard.binding().clone());
    engine.preflight().await?;

    let controller = RunController::new(
        ProcessExecutor::new(engine),
        config.classifier(),
        config.run_settings(),
    );
    let outcome = controller.run(&fixtures, progress).await;

    if let Err(e) = guard.release().await {
        warn!("Display teardown reported a problem: {}", e);
    }

    let report = Report::new(outcome);
    if let Some(ratio) = report.summary.pass_ratio() {
        info!(
            "{} of {} fixtures passed ({:.3})",
            report.summary.passed, report.summary.total, ratio
        );
    }
    Ok(report)
}
