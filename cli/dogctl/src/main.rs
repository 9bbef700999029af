//! dogctl - CLI for the dog routing proxy
//!
//! Checks routing requests locally and sends them to a running proxy's
//! admin endpoint.

use anyhow::Result;
use clap::Parser;

mod commands;
mod error;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
