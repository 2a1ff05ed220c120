//! rtbench CLI - Main Entry Point
//!
//! Runs real-time messaging benchmarks and inspects their result files.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rtbench_harness::HarnessConfig;

mod commands;
mod output;

use commands::{plan, protocols, run, show};

/// rtbench - protocol-agnostic real-time messaging benchmarks
#[derive(Parser)]
#[command(name = "rtbench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file (defaults apply when missing)
    #[arg(long, env = "RTBENCH_CONFIG", default_value = "rtbench.toml", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one configuration and write its result file
    Run(run::RunArgs),

    /// Run every configuration of a YAML test plan
    Plan(plan::PlanArgs),

    /// Summarize a result file
    Show(show::ShowArgs),

    /// List available protocols
    Protocols,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let harness = HarnessConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => run::execute(args, harness, cli.format).await?,
        Commands::Plan(args) => plan::execute(args, harness, cli.format).await?,
        Commands::Show(args) => show::execute(args, cli.format)?,
        Commands::Protocols => protocols::execute(&harness, cli.format)?,
    }

    Ok(())
}
