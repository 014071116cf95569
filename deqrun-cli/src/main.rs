//! deqrun CLI: plan, validate and launch optical-flow training pipelines.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// deqrun: sequential launcher for DEQ optical-flow experiments
#[derive(Parser, Debug)]
#[command(name = "deqrun", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Workspace directory (where the trainer lives unless configured otherwise)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Python interpreter used to run the trainer
    #[arg(long)]
    python: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where a pipeline comes from: a TOML file or a built-in preset.
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub(crate) struct PipelineSource {
    /// Pipeline definition file (TOML)
    pipeline: Option<PathBuf>,

    /// Built-in pipeline name (see `deqrun presets`)
    #[arg(short, long)]
    preset: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Launch every phase of a pipeline in order
    Run {
        #[command(flatten)]
        source: PipelineSource,
        /// Print the commands instead of running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the trainer commands a pipeline would run
    Plan {
        #[command(flatten)]
        source: PipelineSource,
    },
    /// Check a pipeline definition without running it
    Validate {
        #[command(flatten)]
        source: PipelineSource,
    },
    /// List built-in pipelines
    Presets,
    /// Show recorded pipeline runs
    Runs {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr + JSON file logging. RUST_LOG overrides -v/-q.
    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(cli.verbose, cli.quiet)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = directories::ProjectDirs::from("dev", "deqrun", "deqrun")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deqrun.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli, &workspace).await
}

/// Default stderr level for the `-v`/`-q` flags.
fn log_level(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
