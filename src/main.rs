//! Main entry point for the kiotviet-sync CLI

use anyhow::Context;
use clap::Parser;
use kiotviet_sync::cli::Cli;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing, with JSON lines when `LOG_FORMAT=json`
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiotviet_sync=info"));

    // Logs go to stderr so stdout stays clean for reports.
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = cli.execute().await.context("command failed");

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
