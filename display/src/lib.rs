//! Display management for headless engine runs
//!
//! The simulation engine refuses to initialize without a display, even when it
//! never opens a window. This crate decides how child processes get one:
//!
//! - reuse a display the operator already configured,
//! - provision a private virtual display server for the whole run, or
//! - delegate to a display-wrapping launcher for every invocation.
//!
//! The outcome is a [`DisplayBinding`] value that callers thread into every
//! child invocation. Nothing here mutates the harness's own environment.

pub mod xvfb;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub use xvfb::{find_free_display, provision, DisplayConfig, VirtualDisplay};

/// Environment variable carrying the display identifier
pub const DISPLAY_VAR: &str = "DISPLAY";

/// Errors related to display provisioning
#[derive(Error, Debug)]
pub enum DisplayError {
    /// Every identifier in the reserved range carries a lock marker
    #[error("No free display in range :{start}..:{end}. Remove stale lock files or widen the range.")]
    NoFreeDisplay { start: u32, end: u32 },

    /// The virtual display server could not be started
    #[error("Failed to start display server on :{display}: {reason}")]
    ServerStartFailed { display: u32, reason: String },

    /// The display-wrapping launcher is not installed
    #[error("Display launcher '{program}' not found. Install it (e.g. apt-get install xvfb) or use --start-xvfb.")]
    LauncherNotFound { program: String },

    #[error("Invalid display configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DisplayResult<T> = Result<T, DisplayError>;

/// How the run obtains a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Use whatever display the environment already provides
    #[default]
    Existing,
    /// Start one virtual display server for the whole run
    Provision,
    /// Wrap every engine invocation in a display launcher
    Wrap,
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayMode::Existing => write!(f, "existing"),
            DisplayMode::Provision => write!(f, "provision"),
            DisplayMode::Wrap => write!(f, "wrap"),
        }
    }
}

/// Display settings handed to each child process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayBinding {
    /// Children inherit the harness environment unchanged
    Inherit,
    /// Children get `DISPLAY` set to this identifier
    Explicit(String),
    /// Children are started through this launcher argv
    Wrapped(Vec<String>),
}

impl DisplayBinding {
    /// Environment variables to set on the child
    pub fn env_vars(&self) -> Vec<(String, String)> {
        match self {
            DisplayBinding::Explicit(name) => vec![(DISPLAY_VAR.to_string(), name.clone())],
            DisplayBinding::Inherit | DisplayBinding::Wrapped(_) => Vec::new(),
        }
    }

    /// Launcher argv to prepend to the child command line
    pub fn launcher(&self) -> Option<Vec<String>> {
        match self {
            DisplayBinding::Wrapped(argv) => Some(argv.clone()),
            DisplayBinding::Inherit | DisplayBinding::Explicit(_) => None,
        }
    }
}

/// Read the display identifier from the harness environment.
///
/// An empty value counts as unset.
pub fn display_from_env() -> Option<String> {
    std::env::var(DISPLAY_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Check whether an external display identifier is already present
pub fn is_display_configured() -> bool {
    display_from_env().is_some()
}

/// Resolve a program name against `PATH`.
///
/// Names containing a path separator are checked as given.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}

/// Display prepared for a run.
///
/// Holds the provisioned server, if any, for as long as the guard lives.
/// Dropping the guard tears the server down.
#[derive(Debug)]
pub struct DisplayGuard {
    binding: DisplayBinding,
    server: Option<VirtualDisplay>,
}

impl DisplayGuard {
    /// A guard that owns no server
    pub fn unmanaged(binding: DisplayBinding) -> Self {
        Self {
            binding,
            server: None,
        }
    }

    pub fn binding(&self) -> &DisplayBinding {
        &self.binding
    }

    /// The server started for this run, if any
    pub fn server(&self) -> Option<&VirtualDisplay> {
        self.server.as_ref()
    }

    /// Tear down the provisioned server, reporting shutdown problems
    pub async fn release(mut self) -> DisplayResult<()> {
        match self.server.take() {
            Some(server) => server.release().await,
            None => Ok(()),
        }
    }
}

/// Prepare the display for a run according to `mode`.
///
/// `existing` is the display already configured in the environment, usually
/// from [`display_from_env`].
pub async fn acquire(
    mode: DisplayMode,
    config: &DisplayConfig,
    existing: Option<String>,
) -> DisplayResult<DisplayGuard> {
    config.validate()?;

    match mode {
        DisplayMode::Existing => match existing {
            Some(name) => {
                info!("Using existing display {}", name);
                Ok(DisplayGuard::unmanaged(DisplayBinding::Inherit))
            }
            None => {
                if find_in_path(config.wrapper_program()).is_some() {
                    warn!(
                        "No {} set, falling back to '{}' for each fixture",
                        DISPLAY_VAR,
                        config.wrapper_program()
                    );
                    Ok(DisplayGuard::unmanaged(DisplayBinding::Wrapped(
                        config.wrapper.clone(),
                    )))
                } else {
                    warn!(
                        "No {} set. Consider using --use-xvfb or --start-xvfb",
                        DISPLAY_VAR
                    );
                    Ok(DisplayGuard::unmanaged(DisplayBinding::Inherit))
                }
            }
        },
        DisplayMode::Wrap => {
            if find_in_path(config.wrapper_program()).is_none() {
                return Err(DisplayError::LauncherNotFound {
                    program: config.wrapper_program().to_string(),
                });
            }
            Ok(DisplayGuard::unmanaged(DisplayBinding::Wrapped(
                config.wrapper.clone(),
            )))
        }
        DisplayMode::Provision => {
            if let Some(name) = existing {
                info!("Display {} already configured, not starting a server", name);
                return Ok(DisplayGuard::unmanaged(DisplayBinding::Inherit));
            }
            let server = provision(config).await?;
            Ok(DisplayGuard {
                binding: server.binding(),
                server: Some(server),
            })
        }
    }
}
