// ABOUTME: Entry point for the herd CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use herd::config::Config;
use herd::error::Result;
use herd::output::Output;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(cli.output);

    match run(cli, &output).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output.error(&e.to_string());
            std::process::exit(1);
        }
    }
}

/// Hosts are validated when selected, so one broken entry does not block the rest.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(&env::current_dir()?),
    }
}

async fn run(cli: Cli, output: &Output) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => {
            commands::list(&config, output);
            Ok(0)
        }
        Commands::Check { hosts } => commands::check(&config, &hosts, output),
        Commands::Run {
            hosts,
            parallel,
            local,
            remote,
            command,
        } => {
            let forwards = commands::Forwards { local, remote };
            commands::run(config, &hosts, parallel, forwards, &command, output).await
        }
        Commands::Shell {
            host,
            local,
            remote,
        } => {
            let forwards = commands::Forwards { local, remote };
            commands::shell(config, &host, forwards, output).await
        }
        Commands::Copy {
            hosts,
            preserve,
            paths,
        } => commands::copy(config, &hosts, preserve, &paths, output).await,
    }
}
