// ABOUTME: SSH-specific error types.
// ABOUTME: Hop failures name the hop and stage; channel errors cover exec, shell and forwarding.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where along a single hop the connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopStage {
    Dial,
    Tunnel,
    Handshake,
    Authentication,
}

impl fmt::Display for HopStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HopStage::Dial => "dial",
            HopStage::Tunnel => "tunnel",
            HopStage::Handshake => "handshake",
            HopStage::Authentication => "authentication",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("hop {hop}: {stage} failed: {reason}")]
    Hop {
        hop: String,
        stage: HopStage,
        reason: String,
    },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("cancelled by operator")]
    Cancelled,

    #[error("port forwarding failed: {0}")]
    Forward(String),

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn hop(hop: &impl fmt::Display, stage: HopStage, reason: impl fmt::Display) -> Self {
        Error::Hop {
            hop: hop.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn stage(&self) -> Option<HopStage> {
        match self {
            Error::Hop { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
