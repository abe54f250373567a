//! Summary and report generation.

use crate::controller::RunOutcome;
use crate::outcome::{ExecutionResult, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Default report file name
pub const DEFAULT_REPORT_PATH: &str = "validation_report.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report to '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Aggregate counts derived from the result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub errors: usize,
    /// Percentage with one decimal, or "N/A" for an empty run
    pub pass_rate: String,
    pub total_duration_seconds: f64,
    pub failed_files: Vec<String>,
    pub timeout_files: Vec<String>,
    pub error_files: Vec<String>,
}

impl Summary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let files_with = |status: Status| -> Vec<String> {
            results
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.file.clone())
                .collect()
        };

        let total = results.len();
        let passed = results.iter().filter(|r| r.status.is_pass()).count();
        let failed_files = files_with(Status::Fail);
        let timeout_files = files_with(Status::Timeout);
        let error_files = files_with(Status::Error);

        let total_duration: f64 = results.iter().map(|r| r.duration.as_secs_f64()).sum();

        let pass_rate = if total == 0 {
            "N/A".to_string()
        } else {
            format!("{:.1}%", passed as f64 / total as f64 * 100.0)
        };

        Self {
            total,
            passed,
            failed: failed_files.len(),
            timeouts: timeout_files.len(),
            errors: error_files.len(),
            pass_rate,
            total_duration_seconds: (total_duration * 100.0).round() / 100.0,
            failed_files,
            timeout_files,
            error_files,
        }
    }

    /// Fraction of passed fixtures, `None` for an empty run
    pub fn pass_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }

    /// True iff nothing failed, timed out or errored
    pub fn is_success(&self) -> bool {
        self.failed + self.timeouts + self.errors == 0
    }
}

/// Machine-readable run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub summary: Summary,
    pub results: Vec<ExecutionResult>,
    pub aborted_early: bool,
    /// Remediation message of the failure that stopped the run
    pub abort_reason: Option<String>,
    /// Discovered fixtures left unattempted after an early abort
    #[serde(default)]
    pub not_attempted: usize,
}

impl Report {
    pub fn new(outcome: RunOutcome) -> Self {
        Self::at(Utc::now(), outcome)
    }

    pub fn at(timestamp: DateTime<Utc>, outcome: RunOutcome) -> Self {
        let not_attempted = outcome.discovered.saturating_sub(outcome.results.len());
        Self {
            timestamp,
            summary: Summary::from_results(&outcome.results),
            results: outcome.results,
            aborted_early: outcome.aborted.is_some(),
            abort_reason: outcome.aborted.map(|abort| abort.message),
            not_attempted,
        }
    }

    /// Process exit code: 0 for an all-pass run, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.summary.is_success() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> ReportResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn write_json(&self, path: &Path) -> ReportResult<()> {
        let io_error = |source| ReportError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, self.to_json()?).map_err(io_error)?;

        info!("Report written to {}", path.display());
        Ok(())
    }
}

/// Human-readable summary table with per-status file lists
pub fn render_summary(report: &Report) -> String {
    let summary = &report.summary;
    let rule = "=".repeat(60);
    let mut out = String::new();

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "VALIDATION SUMMARY");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Total fixtures:  {}", summary.total);
    let _ = writeln!(
        out,
        "Passed:          {} ({})",
        summary.passed, summary.pass_rate
    );
    let _ = writeln!(out, "Failed:          {}", summary.failed);
    let _ = writeln!(out, "Timeouts:        {}", summary.timeouts);
    let _ = writeln!(out, "Errors:          {}", summary.errors);
    let _ = writeln!(
        out,
        "Total duration:  {}s",
        summary.total_duration_seconds
    );

    if report.aborted_early {
        let _ = writeln!(
            out,
            "Aborted early:   {} fixtures not attempted",
            report.not_attempted
        );
    }

    for (title, files) in [
        ("Failed files", &summary.failed_files),
        ("Timeout files", &summary.timeout_files),
        ("Error files", &summary.error_files),
    ] {
        if files.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}:", title);
        for file in files {
            let _ = writeln!(out, "  - {}", file);
        }
    }

    out
}
