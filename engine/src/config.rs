use crate::executor::{EngineError, EngineResult};
use crate::process::truncate_chars;
use crate::types::Fixture;
use display::{find_in_path, DisplayBinding};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Characters of stdout/stderr kept per fixture
pub const DEFAULT_OUTPUT_BUDGET: usize = 500;

/// Engine jar referenced by the default flags
pub const DEFAULT_ENGINE_JAR: &str = "target/gecko-1.0-jar-with-dependencies.jar";

/// How the engine is invoked for each fixture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine program
    pub program: String,
    /// Fixed flags placed between the program and the fixture path
    pub flags: Vec<String>,
    /// Working directory for the engine process
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the engine process
    pub env_vars: Vec<(String, String)>,
    /// Display settings threaded into every invocation
    pub display: DisplayBinding,
    /// Files that must exist before any fixture runs
    pub required_artifacts: Vec<PathBuf>,
    /// Command producing missing artifacts, program first; empty for none
    #[serde(default)]
    pub build: Vec<String>,
    /// Characters of each output stream kept in the result
    pub output_budget: usize,
    /// Time between the termination signal and a forced kill
    pub termination_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            flags: vec![
                "-Xmx1G".to_string(),
                "-Dpolyglot.js.nashorn-compat=true".to_string(),
                "-cp".to_string(),
                DEFAULT_ENGINE_JAR.to_string(),
                "ch.technokrat.systemtests.CircuitValidator".to_string(),
            ],
            working_dir: None,
            env_vars: Vec::new(),
            display: DisplayBinding::Inherit,
            required_artifacts: vec![PathBuf::from(DEFAULT_ENGINE_JAR)],
            build: Vec::new(),
            output_budget: DEFAULT_OUTPUT_BUDGET,
            termination_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.replace_flags(flags);
        self
    }

    /// Replace the fixed flags. The default engine jar is no longer required
    /// unless the new flags still reference it.
    pub fn replace_flags(&mut self, flags: Vec<String>) {
        if !flags.iter().any(|flag| flag == DEFAULT_ENGINE_JAR) {
            self.required_artifacts
                .retain(|artifact| artifact.as_os_str() != DEFAULT_ENGINE_JAR);
        }
        self.flags = flags;
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn with_display(mut self, display: DisplayBinding) -> Self {
        self.display = display;
        self
    }

    pub fn with_required_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.required_artifacts.push(path.into());
        self
    }

    pub fn with_build_command(mut self, command: Vec<String>) -> Self {
        self.build = command;
        self
    }

    pub fn with_output_budget(mut self, budget: usize) -> Self {
        self.output_budget = budget;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    /// Full argv for one fixture: launcher, program, flags, fixture path
    pub fn command_line(&self, fixture: &Fixture) -> Vec<String> {
        let mut argv = self.display.launcher().unwrap_or_default();
        argv.push(self.program.clone());
        argv.extend(self.flags.iter().cloned());
        argv.push(fixture.path.to_string_lossy().into_owned());
        argv
    }

    /// Environment variables set on the engine process
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut env = self.env_vars.clone();
        env.extend(self.display.env_vars());
        env
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.program.trim().is_empty() {
            return Err(EngineError::InvalidConfig {
                message: "Engine program cannot be empty".to_string(),
            });
        }

        if self.output_budget == 0 {
            return Err(EngineError::InvalidConfig {
                message: "Output budget must be greater than 0".to_string(),
            });
        }

        if self.termination_grace.is_zero() {
            return Err(EngineError::InvalidConfig {
                message: "Termination grace must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Check that everything needed to launch the engine is present.
    ///
    /// Relative artifact paths resolve against the working directory. When
    /// artifacts are missing and a build command is configured, it runs once
    /// before the artifacts are checked again.
    pub async fn preflight(&self) -> EngineResult<()> {
        self.validate()?;

        if let Some(launcher) = self.display.launcher() {
            if let Some(program) = launcher.first() {
                if find_in_path(program).is_none() {
                    return Err(EngineError::ProgramNotFound {
                        program: program.clone(),
                    });
                }
            }
        }

        let program_path = match &self.working_dir {
            Some(dir) if self.program.contains('/') && !self.program.starts_with('/') => {
                dir.join(&self.program).to_string_lossy().into_owned()
            }
            _ => self.program.clone(),
        };
        if find_in_path(&program_path).is_none() {
            return Err(EngineError::ProgramNotFound {
                program: self.program.clone(),
            });
        }

        if self.missing_artifacts().is_empty() {
            return Ok(());
        }

        if !self.build.is_empty() {
            self.build_artifacts().await?;
        }

        match self.missing_artifacts().into_iter().next() {
            Some(missing) => Err(EngineError::ArtifactMissing {
                path: missing.display().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn missing_artifacts(&self) -> Vec<PathBuf> {
        self.required_artifacts
            .iter()
            .map(|artifact| match &self.working_dir {
                Some(dir) if artifact.is_relative() => dir.join(artifact),
                _ => artifact.clone(),
            })
            .filter(|resolved| !resolved.exists())
            .collect()
    }

    async fn build_artifacts(&self) -> EngineResult<()> {
        let Some((program, args)) = self.build.split_first() else {
            return Ok(());
        };
        let command = self.build.join(" ");
        info!("Required engine artifacts missing, running '{}'", command);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| EngineError::BuildFailed {
            command: command.clone(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::BuildFailed {
                command,
                reason: format!(
                    "{}: {}",
                    output.status,
                    truncate_chars(stderr.trim(), self.output_budget)
                ),
            });
        }

        info!("Build complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture() -> Fixture {
        Fixture::new(Path::new("/res"), "/res/a/b.ipes")
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.program, "java");
        assert_eq!(config.flags.len(), 5);
        assert_eq!(config.output_budget, 500);
        assert_eq!(config.termination_grace, Duration::from_secs(5));
        assert_eq!(config.display, DisplayBinding::Inherit);
        assert_eq!(
            config.required_artifacts,
            vec![PathBuf::from(DEFAULT_ENGINE_JAR)]
        );
        assert!(config.build.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replacing_flags_drops_default_jar() {
        let config = EngineConfig::new()
            .with_required_artifact("engine.bin")
            .with_flags(vec!["--check".to_string()]);
        assert_eq!(config.required_artifacts, vec![PathBuf::from("engine.bin")]);

        let config = EngineConfig::new().with_flags(vec![
            "-cp".to_string(),
            DEFAULT_ENGINE_JAR.to_string(),
            "Main".to_string(),
        ]);
        assert_eq!(
            config.required_artifacts,
            vec![PathBuf::from(DEFAULT_ENGINE_JAR)]
        );
    }

    #[test]
    fn test_command_line_plain() {
        let config = EngineConfig::new()
            .with_program("engine")
            .with_flags(vec!["--check".to_string()]);
        assert_eq!(
            config.command_line(&fixture()),
            vec!["engine", "--check", "/res/a/b.ipes"]
        );
    }

    #[test]
    fn test_command_line_wrapped() {
        let config = EngineConfig::new()
            .with_program("engine")
            .with_flags(vec![])
            .with_display(DisplayBinding::Wrapped(vec![
                "xvfb-run".to_string(),
                "--auto-servernum".to_string(),
            ]));
        assert_eq!(
            config.command_line(&fixture()),
            vec!["xvfb-run", "--auto-servernum", "engine", "/res/a/b.ipes"]
        );
    }

    #[test]
    fn test_child_env_includes_display() {
        let config = EngineConfig::new()
            .with_env_var("LC_ALL", "C")
            .with_display(DisplayBinding::Explicit(":101".to_string()));
        assert_eq!(
            config.child_env(),
            vec![
                ("LC_ALL".to_string(), "C".to_string()),
                ("DISPLAY".to_string(), ":101".to_string()),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::new().with_program(" ").validate().is_err());
        assert!(EngineConfig::new().with_output_budget(0).validate().is_err());
        assert!(EngineConfig::new()
            .with_termination_grace(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn test_preflight_missing_program() {
        let config = EngineConfig::new().with_program("no-such-engine-binary-4711");
        assert!(matches!(
            config.preflight().await,
            Err(EngineError::ProgramNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_preflight_missing_launcher() {
        let config = EngineConfig::new()
            .with_program("sh")
            .with_display(DisplayBinding::Wrapped(vec!["/nonexistent/xvfb-run".to_string()]));
        assert!(matches!(
            config.preflight().await,
            Err(EngineError::ProgramNotFound { program }) if program == "/nonexistent/xvfb-run"
        ));
    }

    #[tokio::test]
    async fn test_default_engine_jar_missing_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_program("sh")
            .with_working_dir(dir.path());
        assert!(matches!(
            config.preflight().await,
            Err(EngineError::ArtifactMissing { path }) if path.ends_with(DEFAULT_ENGINE_JAR)
        ));
    }

    #[tokio::test]
    async fn test_preflight_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_program("sh")
            .with_flags(vec![])
            .with_working_dir(dir.path())
            .with_required_artifact("target/engine.jar");
        assert!(matches!(
            config.preflight().await,
            Err(EngineError::ArtifactMissing { .. })
        ));

        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/engine.jar"), b"jar").unwrap();
        assert!(config.preflight().await.is_ok());
    }

    #[tokio::test]
    async fn test_build_command_produces_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_program("sh")
            .with_working_dir(dir.path())
            .with_build_command(vec![
                "sh".to_string(),
                "-c".to_string(),
                "mkdir -p target && touch target/gecko-1.0-jar-with-dependencies.jar".to_string(),
            ]);

        config.preflight().await.unwrap();
        assert!(dir.path().join(DEFAULT_ENGINE_JAR).exists());
    }

    #[tokio::test]
    async fn test_failing_build_command() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_program("sh")
            .with_working_dir(dir.path())
            .with_build_command(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'compilation failed' >&2; exit 1".to_string(),
            ]);

        match config.preflight().await {
            Err(EngineError::BuildFailed { reason, .. }) => {
                assert!(reason.contains("compilation failed"))
            }
            other => panic!("expected BuildFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_that_produces_nothing_still_fails() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_program("sh")
            .with_working_dir(dir.path())
            .with_build_command(vec!["true".to_string()]);
        assert!(matches!(
            config.preflight().await,
            Err(EngineError::ArtifactMissing { .. })
        ));
    }
}
