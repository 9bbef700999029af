//! CLI commands.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dog_proxy::Endpoint;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::CliError;

/// dogctl - Inspect and change the routes of a dog proxy.
#[derive(Debug, Parser)]
#[command(name = "dogctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and analyze a request without sending it.
    Check(CheckCommand),

    /// Send a request to the proxy's admin endpoint.
    Send(SendCommand),
}

#[derive(Debug, Args)]
struct CheckCommand {
    /// Routing request, e.g. "[route all [get]]".
    request: String,
}

#[derive(Debug, Args)]
struct SendCommand {
    /// Admin endpoint (host:port, or a unix socket path).
    #[arg(long, env = "DOG_ADMIN_ADDR")]
    admin: String,

    /// Connect timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Routing request, e.g. "[route 'fdr' @ 1 [delete]]".
    request: String,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Check(cmd) => cmd.run(),
            Commands::Send(cmd) => cmd.run().await,
        }
    }
}

impl CheckCommand {
    fn run(self) -> Result<()> {
        let directive = dog_conf::compile(&self.request).map_err(|source| CliError::Invalid {
            request: self.request.clone(),
            source,
        })?;
        println!("{}", serde_json::to_string_pretty(&directive)?);
        Ok(())
    }
}

impl SendCommand {
    async fn run(self) -> Result<()> {
        let endpoint = Endpoint::parse(&self.admin);
        let stream = endpoint
            .dial(Duration::from_millis(self.timeout_ms))
            .await
            .map_err(CliError::Network)
            .with_context(|| format!("failed to connect to {}", endpoint))?;

        let (reader, mut writer) = tokio::io::split(stream);
        writer.write_all(single_line(&self.request).as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let line = BufReader::new(reader)
            .lines()
            .next_line()
            .await?
            .context("admin endpoint closed without replying")?;

        let reply: serde_json::Value =
            serde_json::from_str(&line).context("admin endpoint sent invalid JSON")?;
        check_reply(&reply)?;

        println!("{}", serde_json::to_string_pretty(&reply["result"])?);
        Ok(())
    }
}

/// The admin protocol is line based; fold any newlines into spaces.
fn single_line(request: &str) -> String {
    request.lines().collect::<Vec<_>>().join(" ")
}

fn check_reply(reply: &serde_json::Value) -> Result<(), CliError> {
    if reply["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    let field = |name: &str| {
        reply["error"][name]
            .as_str()
            .unwrap_or("unknown")
            .to_string()
    };
    Err(CliError::Refused {
        kind: field("kind"),
        message: field("message"),
    })
}
