//! Grocker CLI entry point

use clap::Parser;
use console::style;
use grocker::cli::{Cli, Commands};
use grocker::error::GrockerResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> GrockerResult<()> {
    let cli = Cli::parse();

    // 0 = warn (progress output only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("grocker=warn"),
        1 => EnvFilter::new("grocker=info"),
        _ => EnvFilter::new("grocker=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Build(args) => grocker::cli::commands::build(args).await,
        Commands::Purge(args) => grocker::cli::commands::purge(args).await,
    }
}
