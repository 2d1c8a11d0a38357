//! promlint CLI
//!
//! Lints Prometheus rule files using PromQL label provenance.

mod commands;
mod config;
mod runner;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;

/// promlint: find problems in Prometheus alerting and recording rules.
#[derive(Parser, Debug)]
#[command(name = "promlint", version, about)]
struct Cli {
    /// Configuration file, `.promlint.toml` when not set.
    #[arg(long, env = "PROMLINT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check rule files and report problems.
    Lint(commands::lint::LintArgs),
    /// Show the label provenance of a query.
    Explain(commands::explain::ExplainArgs),
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).context("cannot load configuration")?;

    match cli.command {
        Command::Lint(args) => {
            if commands::lint::run(&config, &args, &cli.format).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Explain(args) => commands::explain::run(&args, &cli.format),
        Command::Config => commands::config::run(&config),
    }
}
