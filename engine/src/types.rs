use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Return code recorded when the process produced no exit status of its own
pub const NO_EXIT_CODE: i32 = -1;

/// A workload file validated by one engine invocation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fixture {
    /// Location of the fixture file
    pub path: PathBuf,
    /// Path relative to the discovery root, `/`-separated
    pub id: String,
}

impl Fixture {
    /// Create a fixture, deriving its id from the discovery root.
    ///
    /// Falls back to the full path when `path` is not under `root`.
    pub fn new(root: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = match path.strip_prefix(root) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.to_string_lossy().into_owned(),
        };
        Self { path, id }
    }
}

impl std::fmt::Display for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Unclassified outcome of a single engine invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResult {
    /// Exit code, negated signal number, or [`NO_EXIT_CODE`]
    pub return_code: i32,
    /// Captured stdout, truncated to the output budget
    pub stdout: String,
    /// Captured stderr, truncated to the output budget
    pub stderr: String,
    /// Wall-clock time from spawn until the process was resolved
    pub duration: Duration,
    /// Set to the expired timeout when the run was cancelled
    pub timed_out: Option<Duration>,
    /// Set when the process could not be launched or awaited
    pub launch_error: Option<String>,
}

impl RawResult {
    pub fn exited(return_code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            return_code,
            stdout,
            stderr,
            duration,
            timed_out: None,
            launch_error: None,
        }
    }

    pub fn timeout(timeout: Duration, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            return_code: NO_EXIT_CODE,
            stdout,
            stderr,
            duration,
            timed_out: Some(timeout),
            launch_error: None,
        }
    }

    pub fn launch_error(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            return_code: NO_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            timed_out: None,
            launch_error: Some(message.into()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out.is_some()
    }

    pub fn is_launch_error(&self) -> bool {
        self.launch_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_id_is_relative() {
        let root = Path::new("/data/resources");
        let fixture = Fixture::new(root, "/data/resources/power/buck.ipes");
        assert_eq!(fixture.id, "power/buck.ipes");
        assert_eq!(fixture.path, PathBuf::from("/data/resources/power/buck.ipes"));
        assert_eq!(fixture.to_string(), "power/buck.ipes");
    }

    #[test]
    fn test_fixture_outside_root_keeps_path() {
        let fixture = Fixture::new(Path::new("/a"), "/b/c.ipes");
        assert_eq!(fixture.id, "/b/c.ipes");
    }

    #[test]
    fn test_raw_result_constructors() {
        let exited = RawResult::exited(2, "out".into(), "err".into(), Duration::from_secs(1));
        assert_eq!(exited.return_code, 2);
        assert!(!exited.is_timeout());
        assert!(!exited.is_launch_error());

        let timeout = RawResult::timeout(
            Duration::from_secs(5),
            String::new(),
            String::new(),
            Duration::from_secs(5),
        );
        assert_eq!(timeout.return_code, NO_EXIT_CODE);
        assert_eq!(timeout.timed_out, Some(Duration::from_secs(5)));

        let launch = RawResult::launch_error("No such file", Duration::ZERO);
        assert!(launch.is_launch_error());
        assert_eq!(launch.launch_error.as_deref(), Some("No such file"));
    }
}
