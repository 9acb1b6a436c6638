// ABOUTME: Authentication credential resolution shared across hosts.
// ABOUTME: Descriptors, the materializer seam, and the deduplicating registry.

mod key;
mod material;
mod prompt;
mod registry;

pub use key::{KeyMaterializer, MAX_PROMPT_ATTEMPTS};
pub use material::{
    CredentialDescriptor, CredentialKey, CredentialKind, CredentialMaterial, HostAuthSet,
};
pub use prompt::{NoPrompt, Prompter, TerminalPrompter, default_prompter};
pub use registry::CredentialRegistry;

use async_trait::async_trait;
use russh::keys::ssh_key;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to resolve secret: {0}")]
    Secret(String),

    #[error("failed to read key {identity}: {reason}")]
    KeyRead { identity: String, reason: String },

    #[error("wrong passphrase for {identity} after {attempts} attempts")]
    WrongPassphrase { identity: String, attempts: usize },

    #[error("key command {command:?} failed: {reason}")]
    KeyCommand { command: String, reason: String },

    #[error("certificate {path}: {reason}")]
    Certificate { path: String, reason: String },

    #[error("SSH agent unavailable: {0}")]
    Agent(String),

    #[error("PKCS#11 provider {provider}: {reason}")]
    Pkcs11 { provider: String, reason: String },

    #[error("cannot prompt: {0}")]
    Prompt(String),
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Produces credential material from a descriptor. The registry guarantees
/// each distinct credential reaches the materializer at most once per run.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(&self, descriptor: &CredentialDescriptor) -> Result<CredentialMaterial>;

    /// Pair a certificate file with its already-realized signing key.
    async fn certificate(
        &self,
        cert: &Path,
        signer: Arc<ssh_key::PrivateKey>,
    ) -> Result<CredentialMaterial>;
}
