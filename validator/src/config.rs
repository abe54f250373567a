//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! command-line overrides. The merged result is checked by
//! [`ValidatorConfig::validate`].

use crate::classifier::{SignatureClassifier, DEFAULT_ENVIRONMENT_SIGNATURE, DEFAULT_REMEDIATION};
use crate::controller::{EnvironmentPolicy, RunSettings, DEFAULT_TIMEOUT};
use crate::discovery::DiscoveryError;
use crate::report::DEFAULT_REPORT_PATH;
use display::{DisplayConfig, DisplayError, DisplayMode};
use engine::{EngineConfig, EngineError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default fixture file extension
pub const DEFAULT_EXTENSION: &str = "ipes";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Display setup failed: {0}")]
    Display(#[from] DisplayError),

    #[error("Engine unavailable: {0}")]
    Engine(#[from] EngineError),

    #[error("Fixture discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to load config file '{path}': {reason}")]
    File { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fully merged settings for one validation run
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Directory searched for fixtures
    pub root: PathBuf,
    pub extension: String,
    /// Per-fixture timeout
    pub timeout: Duration,
    pub verbose: bool,
    /// Print the JSON report instead of console progress
    pub json_only: bool,
    /// Report path; relative paths resolve against `root`
    pub output: PathBuf,
    pub display_mode: DisplayMode,
    pub display: DisplayConfig,
    pub engine: EngineConfig,
    /// Output substring marking a missing display
    pub signature: String,
    pub remediation: String,
    pub environment_policy: EnvironmentPolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extension: DEFAULT_EXTENSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            verbose: false,
            json_only: false,
            output: PathBuf::from(DEFAULT_REPORT_PATH),
            display_mode: DisplayMode::default(),
            display: DisplayConfig::default(),
            engine: EngineConfig::default(),
            signature: DEFAULT_ENVIRONMENT_SIGNATURE.to_string(),
            remediation: DEFAULT_REMEDIATION.to_string(),
            environment_policy: EnvironmentPolicy::default(),
        }
    }
}

/// Command-line layer; `None` keeps the lower layer's value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub extension: Option<String>,
    pub timeout_secs: Option<u64>,
    pub verbose: bool,
    pub json_only: bool,
    pub output: Option<PathBuf>,
    pub display_mode: Option<DisplayMode>,
    pub engine_program: Option<String>,
    /// Replaces the engine's fixed flags when non-empty
    pub engine_args: Vec<String>,
    pub environment_policy: Option<EnvironmentPolicy>,
}

/// TOML file layout. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub run: RunSection,
    pub engine: EngineSection,
    pub display: DisplaySection,
    pub classifier: ClassifierSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub root: Option<PathBuf>,
    pub extension: Option<String>,
    pub timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
    pub output: Option<PathBuf>,
    pub display_mode: Option<DisplayMode>,
    pub on_environment_error: Option<EnvironmentPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub program: Option<String>,
    pub flags: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub required_artifacts: Option<Vec<PathBuf>>,
    /// Command run in preflight when a required artifact is missing
    pub build: Option<Vec<String>>,
    pub output_budget: Option<usize>,
    pub termination_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySection {
    pub server_binary: Option<String>,
    pub server_args: Option<Vec<String>>,
    pub first_display: Option<u32>,
    /// Exclusive upper bound of the reserved range
    pub last_display: Option<u32>,
    pub lock_dir: Option<PathBuf>,
    pub startup_probe_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub wrapper: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierSection {
    pub signature: Option<String>,
    pub remediation: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| ConfigError::File {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}

impl ValidatorConfig {
    /// Merge defaults, an optional config file and overrides, then validate
    pub fn resolve(config_file: Option<&Path>, overrides: Overrides) -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(path) = config_file {
            debug!("Loading configuration from {}", path.display());
            config.apply_file(FileConfig::load(path)?);
        }
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Display setup hints apply only when the signature is the display one
    pub fn display_hints(&self) -> bool {
        self.signature == DEFAULT_ENVIRONMENT_SIGNATURE
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        let FileConfig {
            run,
            engine,
            display,
            classifier,
        } = file;

        if let Some(root) = run.root {
            self.root = root;
        }
        if let Some(extension) = run.extension {
            self.extension = extension;
        }
        if let Some(secs) = run.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(verbose) = run.verbose {
            self.verbose = verbose;
        }
        if let Some(output) = run.output {
            self.output = output;
        }
        if let Some(mode) = run.display_mode {
            self.display_mode = mode;
        }
        if let Some(policy) = run.on_environment_error {
            self.environment_policy = policy;
        }

        if let Some(program) = engine.program {
            self.engine.program = program;
        }
        if let Some(flags) = engine.flags {
            self.engine.replace_flags(flags);
        }
        if let Some(dir) = engine.working_dir {
            self.engine.working_dir = Some(dir);
        }
        self.engine.env_vars.extend(engine.env);
        if let Some(artifacts) = engine.required_artifacts {
            self.engine.required_artifacts = artifacts;
        }
        if let Some(build) = engine.build {
            self.engine.build = build;
        }
        if let Some(budget) = engine.output_budget {
            self.engine.output_budget = budget;
        }
        if let Some(secs) = engine.termination_grace_secs {
            self.engine.termination_grace = Duration::from_secs(secs);
        }

        if let Some(binary) = display.server_binary {
            self.display.server_binary = binary;
        }
        if let Some(args) = display.server_args {
            self.display.server_args = args;
        }
        if let Some(first) = display.first_display {
            self.display.display_range.start = first;
        }
        if let Some(last) = display.last_display {
            self.display.display_range.end = last;
        }
        if let Some(lock_dir) = display.lock_dir {
            self.display.lock_dir = lock_dir;
        }
        if let Some(ms) = display.startup_probe_ms {
            self.display.startup_probe = Duration::from_millis(ms);
        }
        if let Some(secs) = display.shutdown_grace_secs {
            self.display.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(wrapper) = display.wrapper {
            self.display.wrapper = wrapper;
        }

        if let Some(signature) = classifier.signature {
            self.signature = signature;
        }
        if let Some(remediation) = classifier.remediation {
            self.remediation = remediation;
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(root) = overrides.root {
            self.root = root;
        }
        if let Some(extension) = overrides.extension {
            self.extension = extension;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        self.verbose |= overrides.verbose;
        self.json_only |= overrides.json_only;
        if let Some(output) = overrides.output {
            self.output = output;
        }
        if let Some(mode) = overrides.display_mode {
            self.display_mode = mode;
        }
        if let Some(program) = overrides.engine_program {
            self.engine.program = program;
        }
        if !overrides.engine_args.is_empty() {
            self.engine.replace_flags(overrides.engine_args);
        }
        if let Some(policy) = overrides.environment_policy {
            self.environment_policy = policy;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.extension.trim_start_matches('.').trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Fixture extension cannot be empty".to_string(),
            ));
        }

        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "Report output path cannot be empty".to_string(),
            ));
        }

        self.engine.validate()?;
        self.display.validate()?;
        Ok(())
    }

    /// Where the report is written
    pub fn output_path(&self) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            self.root.join(&self.output)
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            timeout: self.timeout,
            environment_policy: self.environment_policy,
        }
    }

    pub fn classifier(&self) -> SignatureClassifier {
        SignatureClassifier::new(self.signature.clone(), self.remediation.clone())
    }
}
