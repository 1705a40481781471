//! Kennel CLI entry point.

use std::sync::Mutex;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use kennel::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err_with(|| format!("invalid log level {:?}", cli.log_level))?;

    // stdout belongs to the container, so logs go to stderr or the log file.
    let (json, stderr) = match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("failed to open log file {}", path.display()))?;
            (Some(fmt::layer().json().with_writer(Mutex::new(file))), None)
        }
        None => (None, Some(fmt::layer().with_target(true).with_writer(std::io::stderr))),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(stderr)
        .init();

    cli.execute().await
}
