// ABOUTME: Output formatting for CLI feedback, plus the per-host output multiplexer.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes for run summaries.

mod multiplexer;

pub use multiplexer::{
    HostLabel, HostWriter, MAX_LINE_BYTES, MultiplexerConfig, OutputFrame, OutputMultiplexer, OutputTap,
    StreamKind, WriteMode, host_color, render_template,
};

use crate::diagnostics::Warning;
use crate::orchestrator::{AggregateResult, HostOutcome, HostState, Stage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    #[default]
    Normal,
    /// Minimal output for CI (only failures)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|t| t.elapsed().as_secs_f64())
    }

    /// Print a progress message to stderr (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            eprintln!("{message}");
        }
    }

    /// Print a line of command output (list, check) in any mode but JSON.
    pub fn line(&self, message: &str) {
        if self.mode != OutputMode::Json {
            println!("{message}");
        }
    }

    pub fn warning(&self, warning: &Warning) {
        match self.mode {
            OutputMode::Normal => eprintln!("Warning: {}", warning.message),
            OutputMode::Quiet => {}
            OutputMode::Json => emit(&JsonEvent::Warning {
                kind: warning.kind,
                message: &warning.message,
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {message}"),
            OutputMode::Json => {
                let event = JsonEvent::Error {
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Report every host's outcome, then warnings and a closing tally.
    pub fn summary(&self, result: &AggregateResult) {
        for warning in result.diagnostics.warnings() {
            self.warning(warning);
        }

        match self.mode {
            OutputMode::Json => {
                for outcome in &result.outcomes {
                    emit(&JsonEvent::from(outcome));
                }
                emit(&JsonEvent::Summary {
                    hosts: result.outcomes.len(),
                    failed: count_unsuccessful(result),
                    exit_code: result.exit_code(),
                    duration_secs: self.duration(),
                });
            }
            OutputMode::Quiet => {
                for outcome in result.outcomes.iter().filter(|o| !o.is_success()) {
                    eprintln!("{}", host_line(outcome));
                }
            }
            OutputMode::Normal => {
                let verbose = result.outcomes.len() > 1 || !result.is_success();
                if verbose {
                    for outcome in &result.outcomes {
                        eprintln!("{}", host_line(outcome));
                    }
                }
                if result.outcomes.len() > 1 {
                    eprintln!("{}", tally(result, self.elapsed_secs()));
                }
            }
        }
    }
}

fn count_unsuccessful(result: &AggregateResult) -> usize {
    result.outcomes.iter().filter(|o| !o.is_success()).count()
}

fn emit(event: &JsonEvent<'_>) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// One human-readable line describing a host's outcome.
pub fn host_line(outcome: &HostOutcome) -> String {
    match (&outcome.error, outcome.exit_code) {
        (Some(error), _) => format!("{}: failed ({error})", outcome.host),
        (None, Some(0)) => format!("{}: ok", outcome.host),
        (None, Some(code)) => format!("{}: exit {code}", outcome.host),
        (None, None) => match &outcome.transfer {
            Some(report) => format!(
                "{}: ok ({} paths, {} bytes)",
                outcome.host,
                report.total(),
                report.bytes()
            ),
            None => format!("{}: ok", outcome.host),
        },
    }
}

fn tally(result: &AggregateResult, elapsed: f64) -> String {
    let failed = count_unsuccessful(result);
    let total = result.outcomes.len();
    let mut line = format!("{total} hosts: {} succeeded, {failed} failed", total - failed);
    if elapsed > 0.0 {
        line.push_str(&format!(" ({elapsed:.1}s)"));
    }
    line
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum JsonEvent<'a> {
    Host {
        host: &'a str,
        state: HostState,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes: Option<u64>,
        finished_at: DateTime<Utc>,
    },
    Warning {
        kind: crate::diagnostics::WarningKind,
        message: &'a str,
    },
    Error {
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f64>,
    },
    Summary {
        hosts: usize,
        failed: usize,
        exit_code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f64>,
    },
}

impl<'a> From<&'a HostOutcome> for JsonEvent<'a> {
    fn from(outcome: &'a HostOutcome) -> Self {
        JsonEvent::Host {
            host: outcome.host.as_str(),
            state: outcome.state,
            exit_code: outcome.exit_code,
            stage: outcome.error.as_ref().map(|e| e.stage()),
            error: outcome.error.as_ref().map(ToString::to_string),
            bytes: outcome.transfer.as_ref().map(|r| r.bytes()),
            finished_at: outcome.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::HostError;
    use crate::types::HostName;

    fn outcome(name: &str, code: Option<u32>) -> HostOutcome {
        let host = HostName::new(name).unwrap();
        let mut outcome = HostOutcome::failed(host.clone(), HostError::Lost { host });
        outcome.state = HostState::Completed;
        outcome.error = None;
        outcome.exit_code = code;
        outcome
    }

    #[test]
    fn host_line_describes_exit_status() {
        assert_eq!(host_line(&outcome("web1", Some(0))), "web1: ok");
        assert_eq!(host_line(&outcome("web2", Some(3))), "web2: exit 3");
    }

    #[test]
    fn host_line_includes_error() {
        let host = HostName::new("db1").unwrap();
        let failed = HostOutcome::failed(host.clone(), HostError::Panicked { host });
        assert_eq!(host_line(&failed), "db1: failed (db1: worker panicked)");
    }

    #[test]
    fn json_host_event_carries_stage_and_timestamp() {
        let host = HostName::new("db1").unwrap();
        let failed = HostOutcome::failed(host.clone(), HostError::Cancelled { host });
        let json = serde_json::to_value(JsonEvent::from(&failed)).unwrap();

        assert_eq!(json["event"], "host");
        assert_eq!(json["host"], "db1");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "cancelled");
        assert!(json["finished_at"].is_string());
        assert!(json.get("exit_code").is_none());
    }

    #[test]
    fn tally_counts_failures() {
        let result = AggregateResult::new(
            vec![outcome("web1", Some(0)), outcome("web2", Some(1))],
            crate::diagnostics::Diagnostics::new(),
        );
        assert_eq!(tally(&result, 0.0), "2 hosts: 1 succeeded, 1 failed");
    }
}
