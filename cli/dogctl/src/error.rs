//! Error handling and display for the CLI.

use colored::Colorize;
use dog_conf::{ConfError, Position};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid request")]
    Invalid {
        request: String,
        #[source]
        source: ConfError,
    },

    #[error("proxy refused request ({kind}): {message}")]
    Refused { kind: String, message: String },

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(CliError::Invalid { request, source }) = err.downcast_ref::<CliError>() {
        let (line, marker) = excerpt(request, source.pos());
        eprintln!("\n  {}", line);
        eprintln!("  {}", marker.yellow());
    }
}

/// The line of `request` that `pos` falls on, and a caret under its column.
pub fn excerpt(request: &str, pos: Position) -> (&str, String) {
    let line = request
        .split('\n')
        .nth(pos.line.saturating_sub(1))
        .unwrap_or_default()
        .trim_end_matches('\r');
    (line, caret(line, pos.column))
}

/// A marker line pointing at `column` (1-based, in characters) of `source`.
pub fn caret(source: &str, column: usize) -> String {
    let width = column.saturating_sub(1).min(source.chars().count());
    format!("{}^", " ".repeat(width))
}
