// ABOUTME: Per-host errors tagged with the stage that failed.
// ABOUTME: Recorded in the host's outcome; never aborts sibling hosts.

use crate::ssh;
use crate::types::HostName;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HostError {
    #[snafu(display("{host}: connect failed: {source}"))]
    Connect { host: HostName, source: ssh::Error },

    #[snafu(display("{host}: port forwarding failed: {source}"))]
    Forward { host: HostName, source: ssh::Error },

    #[snafu(display("{host}: exec failed: {source}"))]
    Exec { host: HostName, source: ssh::Error },

    #[snafu(display("{host}: shell failed: {source}"))]
    Shell { host: HostName, source: ssh::Error },

    #[snafu(display("{host}: transfer setup failed: {source}"))]
    TransferSetup { host: HostName, source: ssh::Error },

    #[snafu(display("{host}: {failed} of {total} paths failed to transfer"))]
    Transfer {
        host: HostName,
        failed: usize,
        total: usize,
    },

    #[snafu(display("{host}: cancelled by operator"))]
    Cancelled { host: HostName },

    #[snafu(display("{host}: worker panicked"))]
    Panicked { host: HostName },

    #[snafu(display("{host}: worker ended without reporting"))]
    Lost { host: HostName },
}

/// Stage a host was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Dial,
    Auth,
    Forward,
    Exec,
    Shell,
    Transfer,
    Cancelled,
    Internal,
}

impl HostError {
    /// Returns the failing stage for programmatic handling.
    pub fn stage(&self) -> Stage {
        match self {
            HostError::Connect { source, .. } => match source.stage() {
                Some(ssh::HopStage::Authentication) => Stage::Auth,
                _ => Stage::Dial,
            },
            HostError::Forward { .. } => Stage::Forward,
            HostError::Exec { source, .. } | HostError::Shell { source, .. }
                if matches!(source, ssh::Error::Cancelled) =>
            {
                Stage::Cancelled
            }
            HostError::Exec { .. } => Stage::Exec,
            HostError::Shell { .. } => Stage::Shell,
            HostError::TransferSetup { .. } | HostError::Transfer { .. } => Stage::Transfer,
            HostError::Cancelled { .. } => Stage::Cancelled,
            HostError::Panicked { .. } | HostError::Lost { .. } => Stage::Internal,
        }
    }

    pub fn host(&self) -> &HostName {
        match self {
            HostError::Connect { host, .. }
            | HostError::Forward { host, .. }
            | HostError::Exec { host, .. }
            | HostError::Shell { host, .. }
            | HostError::TransferSetup { host, .. }
            | HostError::Transfer { host, .. }
            | HostError::Cancelled { host }
            | HostError::Panicked { host }
            | HostError::Lost { host } => host,
        }
    }
}
