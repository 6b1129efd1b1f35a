use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use linkmetry_engine::AnalyticsConfig;

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(name = "linkmetry", about = "Experiment and attribution analytics for short links")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to <config_dir>/linkmetry/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Standalone statistics calculators
    Stats(commands::stats::StatsArgs),
    /// Inspect and control experiments
    Experiment(commands::experiment::ExperimentArgs),
    /// Attribution reports
    Attribution(commands::attribution::AttributionArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        config_path: cli.config.unwrap_or_else(AnalyticsConfig::default_path),
        json: cli.json,
    };

    match cli.command {
        Commands::Stats(args) => commands::stats::run(args, &ctx),
        Commands::Experiment(args) => commands::experiment::run(args, &ctx).await,
        Commands::Attribution(args) => commands::attribution::run(args, &ctx).await,
    }
}
