// ABOUTME: The operation fanned out to every selected host, and run-wide options.
// ABOUTME: One enum covers command execution, interactive shells and file transfers.

use crate::config::ForwardRule;
use crate::transfer::TransferPlan;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Exec { command: String },
    Shell,
    Transfer(TransferPlan),
}

impl Operation {
    pub fn exec(args: &[String]) -> Self {
        Operation::Exec {
            command: args.join(" "),
        }
    }

    /// Single-host exec and shell sessions own the local terminal directly.
    pub fn is_interactive(&self, host_count: usize) -> bool {
        host_count == 1 && matches!(self, Operation::Exec { .. } | Operation::Shell)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Exec { command } => write!(f, "exec {command:?}"),
            Operation::Shell => f.write_str("shell"),
            Operation::Transfer(plan) => write!(f, "{:?} transfer", plan.direction),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardSet {
    pub local: Vec<ForwardRule>,
    pub remote: Vec<ForwardRule>,
}

impl ForwardSet {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Multi-host exec: run all hosts at once and broadcast stdin.
    pub parallel: bool,
    /// Applied only when exactly one host is selected.
    pub forwards: ForwardSet,
    pub term: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            forwards: ForwardSet::default(),
            term: std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
        }
    }
}
