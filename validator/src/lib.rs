pub mod classifier;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod outcome;
pub mod report;
pub mod runner;

pub use classifier::{Classification, OutcomeClassifier, SignatureClassifier};
pub use config::{ConfigError, ConfigResult, FileConfig, Overrides, ValidatorConfig};
pub use controller::{
    ConsoleProgress, EarlyAbort, EnvironmentPolicy, ProgressReporter, RunController, RunOutcome,
    RunSettings, SilentProgress,
};
pub use discovery::{discover, DiscoveryError, DiscoveryResult};
pub use outcome::{ExecutionResult, Status};
pub use report::{render_summary, Report, ReportError, ReportResult, Summary};
pub use runner::run_validation;
