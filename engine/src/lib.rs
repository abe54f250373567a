pub mod config;
pub mod executor;
pub mod process;
pub mod types;

pub use config::EngineConfig;
pub use executor::{EngineError, EngineResult, FixtureExecutor};
pub use process::{truncate_chars, ProcessExecutor};
pub use types::{Fixture, RawResult};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::executor::*;
    pub use crate::process::*;
    pub use crate::types::*;
}
