use crate::types::{Fixture, RawResult};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Engine setup problems detected before any fixture runs
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine program '{program}' not found. Check the engine path or PATH.")]
    ProgramNotFound { program: String },

    #[error("Required engine artifact missing: {path}")]
    ArtifactMissing { path: String },

    #[error("Build command '{command}' failed: {reason}")]
    BuildFailed { command: String, reason: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Runs the engine against a single fixture.
///
/// Implementations never fail: launch problems, timeouts and crashes are all
/// reported through the returned [`RawResult`].
#[async_trait]
pub trait FixtureExecutor: Send + Sync {
    async fn run(&self, fixture: &Fixture, timeout: Duration) -> RawResult;

    fn executor_name(&self) -> &'static str;
}
