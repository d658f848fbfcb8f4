//! kiln CLI entry point.
//!
//! Parses the command line, installs the tracing subscriber, executes
//! the queries, and renders failures as user-friendly errors.

use anyhow::Result;
use clap::Parser;
use kiln::cli;
use kiln::core::user_friendly_error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute() {
        Ok(()) => Ok(()),
        Err(error) => {
            let context = user_friendly_error(error);
            context.display();
            std::process::exit(1);
        }
    }
}
