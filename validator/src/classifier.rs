//! Outcome classification.
//!
//! Separates "the fixture is broken" (`fail`, specific to one fixture) from
//! "the environment is broken" (`error` with a fixed remediation message,
//! identical for every remaining fixture).

use crate::outcome::Status;
use engine::RawResult;

/// Substring the engine prints when it cannot initialize its display
pub const DEFAULT_ENVIRONMENT_SIGNATURE: &str = "HeadlessException";

/// Message recorded for fixtures hit by the missing display
pub const DEFAULT_REMEDIATION: &str =
    "Display required. Run with xvfb-run or set DISPLAY environment variable.";

/// Status and message derived from a raw engine result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: Status,
    pub message: String,
    /// The failure is systemic: every further fixture would fail the same way
    pub environment_failure: bool,
}

impl Classification {
    fn fixture(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            environment_failure: false,
        }
    }
}

/// Maps raw engine results to statuses
pub trait OutcomeClassifier: Send + Sync {
    fn classify(&self, raw: &RawResult) -> Classification;
}

/// Classifier that detects environment failures by an output signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureClassifier {
    signature: String,
    remediation: String,
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ENVIRONMENT_SIGNATURE, DEFAULT_REMEDIATION)
    }
}

impl SignatureClassifier {
    pub fn new(signature: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            remediation: remediation.into(),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn remediation(&self) -> &str {
        &self.remediation
    }

    fn has_signature(&self, raw: &RawResult) -> bool {
        !self.signature.is_empty()
            && (raw.stdout.contains(&self.signature) || raw.stderr.contains(&self.signature))
    }
}

impl OutcomeClassifier for SignatureClassifier {
    fn classify(&self, raw: &RawResult) -> Classification {
        if let Some(error) = &raw.launch_error {
            return Classification::fixture(Status::Error, error.clone());
        }

        if let Some(limit) = raw.timed_out {
            return Classification::fixture(
                Status::Timeout,
                format!("Timeout after {}s", limit.as_secs()),
            );
        }

        if raw.return_code == 0 {
            return Classification::fixture(Status::Pass, raw.stderr.clone());
        }

        if self.has_signature(raw) {
            return Classification {
                status: Status::Error,
                message: self.remediation.clone(),
                environment_failure: true,
            };
        }

        Classification::fixture(Status::Fail, raw.stderr.clone())
    }
}
