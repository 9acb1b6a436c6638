// ABOUTME: Host lifecycle states, per-host outcomes and the aggregated run result.
// ABOUTME: The aggregate decides the process exit code.

use super::error::HostError;
use crate::diagnostics::{Diagnostics, Warning};
use crate::transfer::TransferReport;
use crate::types::HostName;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Pending,
    Connecting,
    Authenticated,
    Executing,
    Completed,
    Failed,
    Closed,
}

impl HostState {
    fn follows(self, previous: HostState) -> bool {
        use HostState::*;
        matches!(
            (previous, self),
            (Pending, Connecting)
                | (Pending, Failed)
                | (Connecting, Authenticated)
                | (Connecting, Failed)
                | (Authenticated, Executing)
                | (Authenticated, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Completed, Closed)
                | (Failed, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HostState::Completed | HostState::Failed | HostState::Closed)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostState::Pending => "pending",
            HostState::Connecting => "connecting",
            HostState::Authenticated => "authenticated",
            HostState::Executing => "executing",
            HostState::Completed => "completed",
            HostState::Failed => "failed",
            HostState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Records the states one host passes through.
#[derive(Debug)]
pub(super) struct StateTracker {
    host: HostName,
    transitions: Vec<HostState>,
}

impl StateTracker {
    pub(super) fn new(host: &HostName) -> Self {
        Self {
            host: host.clone(),
            transitions: vec![HostState::Pending],
        }
    }

    pub(super) fn current(&self) -> HostState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(HostState::Pending)
    }

    pub(super) fn enter(&mut self, next: HostState) {
        let current = self.current();
        if !next.follows(current) {
            tracing::warn!(host = %self.host, from = %current, to = %next, "unexpected state transition");
        }
        tracing::debug!(host = %self.host, state = %next, "host state");
        self.transitions.push(next);
    }

    pub(super) fn into_transitions(self) -> Vec<HostState> {
        self.transitions
    }
}

/// Final record for one host.
#[derive(Debug)]
pub struct HostOutcome {
    pub host: HostName,
    /// `Completed` or `Failed`.
    pub state: HostState,
    pub exit_code: Option<u32>,
    pub error: Option<HostError>,
    pub transitions: Vec<HostState>,
    pub transfer: Option<TransferReport>,
    pub warnings: Vec<Warning>,
    pub finished_at: DateTime<Utc>,
}

impl HostOutcome {
    /// Outcome for a host whose worker never reported.
    pub fn failed(host: HostName, error: HostError) -> Self {
        Self {
            host,
            state: HostState::Failed,
            exit_code: None,
            error: Some(error),
            transitions: vec![HostState::Pending, HostState::Failed],
            transfer: None,
            warnings: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    /// Completed with exit status 0, or a transfer with no failed paths.
    pub fn is_success(&self) -> bool {
        self.state == HostState::Completed && self.exit_code.unwrap_or(0) == 0
    }
}

/// Every host's outcome, in selection order.
#[derive(Debug, Default)]
pub struct AggregateResult {
    pub outcomes: Vec<HostOutcome>,
    pub diagnostics: Diagnostics,
}

impl AggregateResult {
    pub fn new(outcomes: Vec<HostOutcome>, mut diagnostics: Diagnostics) -> Self {
        for outcome in &outcomes {
            for warning in &outcome.warnings {
                diagnostics.push(warning.clone());
            }
        }
        Self {
            outcomes,
            diagnostics,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &HostOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == HostState::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(HostOutcome::is_success)
    }

    /// One host: its remote exit status, or 1 when it never produced one.
    /// Several hosts: 0 only when every host succeeded.
    pub fn exit_code(&self) -> i32 {
        match self.outcomes.as_slice() {
            [single] => match (single.state, single.exit_code) {
                (HostState::Completed, Some(code)) => code.min(255) as i32,
                (HostState::Completed, None) => 0,
                _ => 1,
            },
            outcomes => {
                if !outcomes.is_empty() && outcomes.iter().all(HostOutcome::is_success) {
                    0
                } else {
                    1
                }
            }
        }
    }
}
