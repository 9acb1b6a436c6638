// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use herd::config::ForwardRule;
use herd::output::OutputMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "herd")]
#[command(about = "Run commands, shells and file transfers across many SSH hosts")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ./herd.yml, then ~/.config/herd/config.yml)
    #[arg(short = 'F', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Status output format
    #[arg(long, value_enum, default_value_t = OutputMode::Normal, global = true)]
    pub output: OutputMode,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured hosts
    List,

    /// Validate the configuration and show each host's route
    Check {
        /// Only check these hosts
        #[arg(short = 'H', long = "host")]
        hosts: Vec<String>,
    },

    /// Run a command on one or more hosts
    Run {
        /// Target host (repeatable)
        #[arg(short = 'H', long = "host", required = true)]
        hosts: Vec<String>,

        /// Run on all hosts at once instead of one after another
        #[arg(short, long)]
        parallel: bool,

        /// Local port forward [bind_address:]port:host:hostport
        #[arg(short = 'L', value_parser = ForwardRule::parse)]
        local: Vec<ForwardRule>,

        /// Remote port forward [bind_address:]port:host:hostport
        #[arg(short = 'R', value_parser = ForwardRule::parse)]
        remote: Vec<ForwardRule>,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Open an interactive shell on one host
    Shell {
        #[arg(short = 'H', long = "host")]
        host: String,

        /// Local port forward [bind_address:]port:host:hostport
        #[arg(short = 'L', value_parser = ForwardRule::parse)]
        local: Vec<ForwardRule>,

        /// Remote port forward [bind_address:]port:host:hostport
        #[arg(short = 'R', value_parser = ForwardRule::parse)]
        remote: Vec<ForwardRule>,
    },

    /// Copy files to or from hosts; prefix the remote side with "remote:"
    Copy {
        /// Target host (repeatable)
        #[arg(short = 'H', long = "host", required = true)]
        hosts: Vec<String>,

        /// Preserve permission bits
        #[arg(short = 'P', long)]
        preserve: bool,

        /// Sources followed by the destination
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
}
