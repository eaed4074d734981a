//! Lilac CLI - batch build scheduler
//!
//! Entry point for the lilac command-line application.

use anyhow::Result;
use clap::Parser;

use lilac::cli::Cli;
use lilac::infra::signals;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        match cli.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    signals::become_subreaper();
    signals::install_interrupt_handler()?;

    cli.run().await
}
