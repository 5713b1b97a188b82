use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use harness::artifacts::{HARNESS_DIR, LOG_DIR};
use harness::context::GitMode;
use harness::review::ReviewCategory;

mod cmd;

#[derive(Parser)]
#[command(name = "harness")]
#[command(
    version,
    about = "LLM-driven development pipeline: questions, planning, execution, review and commit"
)]
pub struct Cli {
    /// Print sub-phase changes and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer every decision point automatically
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .harness directory, artifact files and a default harness.toml
    Init,
    /// Run the workflow, resuming a saved session if there is one
    Run(RunArgs),
    /// Show artifact and session status
    Status,
    /// Delete the saved session and logs
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Ignore any saved session and start from Idle
    #[arg(long)]
    pub fresh: bool,

    /// Write this text to product-description.md before starting
    #[arg(short, long)]
    pub description: Option<String>,

    /// Override the main iteration budget
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Enable debug breakpoints
    #[arg(long)]
    pub debug: bool,

    /// Git mode: off, local or push
    #[arg(long)]
    pub git: Option<GitMode>,

    /// Review categories (comma-separated, e.g. general,security,tests)
    #[arg(long, value_delimiter = ',')]
    pub review: Option<Vec<ReviewCategory>>,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default harness.toml file
    Init,
}

/// Console logs go to stderr; when `.harness/` exists a daily JSON log is
/// written under `.harness/logs/` as well.
fn init_tracing(project_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let console_filter = if verbose {
        EnvFilter::new("harness=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_filter(console_filter);

    let harness_dir = project_dir.join(HARNESS_DIR);
    let (file_layer, guard) = if harness_dir.is_dir() {
        let appender = tracing_appender::rolling::daily(harness_dir.join(LOG_DIR), "harness.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::new("harness=debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _log_guard = init_tracing(&project_dir, cli.verbose);
    tracing::debug!(dir = %project_dir.display(), "harness started");

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run(args) => cmd::cmd_run(&cli, project_dir, args.clone()).await?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
