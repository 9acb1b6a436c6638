// ABOUTME: Secret values for passwords, passphrases and PINs.
// ABOUTME: Literal strings, environment variable references, or command output.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::process::Command;

#[derive(Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum Secret {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
    FromCommand {
        command: String,
    },
}

impl Secret {
    /// Produce the secret value. Commands run through `sh -c` and their
    /// stdout is trimmed of the trailing newline.
    pub fn resolve(&self) -> Result<String> {
        match self {
            Secret::Literal(s) => Ok(s.clone()),
            Secret::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
            Secret::FromCommand { command } => {
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .map_err(|e| Error::SecretCommand {
                        command: command.clone(),
                        reason: e.to_string(),
                    })?;

                if !output.status.success() {
                    return Err(Error::SecretCommand {
                        command: command.clone(),
                        reason: format!("exited with {}", output.status),
                    });
                }

                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(stdout.trim_end_matches(['\r', '\n']).to_string())
            }
        }
    }

    /// Stable identity of where the secret comes from, used for deduplication.
    pub fn identity(&self) -> String {
        match self {
            Secret::Literal(s) => format!("literal:{s}"),
            Secret::FromEnv { var, default } => {
                format!("env:{var}:{}", default.as_deref().unwrap_or(""))
            }
            Secret::FromCommand { command } => format!("command:{command}"),
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::Literal(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Literal(_) => f.write_str("Secret::Literal(<redacted>)"),
            Secret::FromEnv { var, .. } => write!(f, "Secret::FromEnv({var})"),
            Secret::FromCommand { command } => write!(f, "Secret::FromCommand({command})"),
        }
    }
}
