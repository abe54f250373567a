//! Per-fixture outcome types shared by the controller and the report.

use engine::Fixture;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Final status of one fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Engine exited 0 within the timeout
    Pass,
    /// Engine rejected the fixture
    Fail,
    /// Engine exceeded the timeout and was terminated
    Timeout,
    /// Engine could not run: launch failure or broken environment
    Error,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pass, Status::Fail, Status::Timeout, Status::Error];

    pub fn is_pass(&self) -> bool {
        matches!(self, Status::Pass)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pass => write!(f, "pass"),
            Status::Fail => write!(f, "fail"),
            Status::Timeout => write!(f, "timeout"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Recorded outcome of one fixture attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Fixture id, relative to the discovery root
    pub file: String,
    pub absolute_path: PathBuf,
    pub status: Status,
    pub returncode: i32,
    /// Captured stdout, truncated
    pub stdout: String,
    /// Classification message; captured stderr for pass and fail
    pub stderr: String,
    /// Elapsed wall-clock time, serialized in seconds
    #[serde(serialize_with = "ser_secs", deserialize_with = "de_secs")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn new(
        fixture: &Fixture,
        status: Status,
        returncode: i32,
        stdout: String,
        message: String,
        duration: Duration,
    ) -> Self {
        Self {
            file: fixture.id.clone(),
            absolute_path: fixture.path.clone(),
            status,
            returncode,
            stdout,
            stderr: message,
            duration,
        }
    }

    /// The classification message for this result
    pub fn message(&self) -> &str {
        &self.stderr
    }
}

fn ser_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn de_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    #[test]
    fn test_status_display_matches_serde() {
        for status in Status::ALL {
            let serialized = serde_json::to_value(status).unwrap();
            assert_eq!(serialized, json!(status.to_string()));
        }
        assert!(Status::Pass.is_pass());
        assert!(!Status::Error.is_pass());
    }

    #[test]
    fn test_execution_result_json_shape() {
        let fixture = Fixture::new(Path::new("/res"), "/res/dc/buck.ipes");
        let result = ExecutionResult::new(
            &fixture,
            Status::Fail,
            1,
            "out".to_string(),
            "singular matrix".to_string(),
            Duration::from_millis(1500),
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["file"], "dc/buck.ipes");
        assert_eq!(value["absolute_path"], "/res/dc/buck.ipes");
        assert_eq!(value["status"], "fail");
        assert_eq!(value["returncode"], 1);
        assert_eq!(value["stderr"], "singular matrix");
        assert_eq!(value["duration"], 1.5);

        let back: ExecutionResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.message(), "singular matrix");
    }
}
