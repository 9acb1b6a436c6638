// ABOUTME: Application-wide error types for herd.
// ABOUTME: Configuration problems are fatal and reported before any connection.

use crate::route::RouteError;
use crate::types::HostName;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0} or ~/.config/herd")]
    ConfigNotFound(PathBuf),

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("secret command {command:?} failed: {reason}")]
    SecretCommand { command: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{owner}: unknown proxy_type {value:?} (expected ssh, http, https, socks or socks5)")]
    InvalidProxyType { owner: String, value: String },

    #[error("invalid forward rule: {0}")]
    InvalidForward(String),

    #[error("host {0} has no authentication method configured")]
    EmptyAuth(HostName),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
