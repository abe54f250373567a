use clap::Parser;
use display::DisplayMode;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use validator::{
    render_summary, run_validation, ConfigError, ConsoleProgress, EnvironmentPolicy, Overrides,
    ProgressReporter, SilentProgress, ValidatorConfig,
};

const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "validate-fixtures")]
#[command(about = "Run every simulation fixture through the engine and report which ones fail")]
struct Cli {
    /// Directory searched recursively for fixtures
    root: Option<PathBuf>,

    /// Fixture file extension
    #[arg(long)]
    extension: Option<String>,

    /// Per-fixture timeout in seconds [default: 30]
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Show failure details
    #[arg(short, long)]
    verbose: bool,

    /// Print only the JSON report
    #[arg(long)]
    json_only: bool,

    /// Report path, relative to the root unless absolute [default: validation_report.json]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Wrap every engine invocation in xvfb-run
    #[arg(long, conflicts_with = "start_xvfb")]
    use_xvfb: bool,

    /// Start one Xvfb server for the whole run
    #[arg(long)]
    start_xvfb: bool,

    /// Engine program
    #[arg(long)]
    engine: Option<String>,

    /// Engine argument placed before the fixture path; replaces the default flags
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// What to do when the environment cannot run the engine
    #[arg(long, value_enum)]
    on_environment_error: Option<EnvironmentPolicy>,
}

impl Cli {
    fn overrides(self) -> (Option<PathBuf>, Overrides) {
        let display_mode = if self.use_xvfb {
            Some(DisplayMode::Wrap)
        } else if self.start_xvfb {
            Some(DisplayMode::Provision)
        } else {
            None
        };

        let overrides = Overrides {
            root: self.root,
            extension: self.extension,
            timeout_secs: self.timeout,
            verbose: self.verbose,
            json_only: self.json_only,
            output: self.output,
            display_mode,
            engine_program: self.engine,
            engine_args: self.engine_args,
            environment_policy: self.on_environment_error,
        };
        (self.config, overrides)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so --json-only output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config_file, overrides) = Cli::parse().overrides();

    let config = match ValidatorConfig::resolve(config_file.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => return config_failure(e),
    };

    tokio::select! {
        code = validate(&config) => code,
        _ = tokio::signal::ctrl_c() => {
            error!("Interrupted, stopping the run");
            eprintln!("\nInterrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn validate(config: &ValidatorConfig) -> ExitCode {
    let mut progress: Box<dyn ProgressReporter> = if config.json_only {
        Box::new(SilentProgress)
    } else {
        Box::new(
            ConsoleProgress::stdout(config.verbose).with_display_hints(config.display_hints()),
        )
    };

    if config.display_mode != DisplayMode::Existing && display::is_display_configured() {
        info!(
            "{} is set but ignored in {} mode",
            display::DISPLAY_VAR,
            config.display_mode
        );
    }

    let report = match run_validation(config, display::display_from_env(), progress.as_mut()).await
    {
        Ok(report) => report,
        Err(e) => return config_failure(e),
    };

    let output = config.output_path();

    if config.json_only {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to render report: {}", e),
        }
    } else {
        print!("{}", render_summary(&report));
    }

    if let Err(e) = report.write_json(&output) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if !config.json_only {
        println!("\nReport saved to: {}", output.display());
    }

    ExitCode::from(report.exit_code())
}

fn config_failure(e: ConfigError) -> ExitCode {
    error!("Configuration error: {}", e);
    eprintln!("Error: {}", e);
    ExitCode::from(EXIT_CONFIG_ERROR)
}
