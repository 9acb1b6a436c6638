// ABOUTME: Turns credential descriptors into usable SSH credentials.
// ABOUTME: Reads keys and certificates, runs key commands, loads PKCS#11 providers into the agent.

use super::material::{CredentialDescriptor, CredentialMaterial};
use super::prompt::Prompter;
use super::{CredentialError, Materializer, Result};
use crate::config::Secret;
use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use russh::keys::{decode_secret_key, load_openssh_certificate, ssh_key};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Passphrase or PIN prompts per credential before giving up.
pub const MAX_PROMPT_ATTEMPTS: usize = 3;

pub struct KeyMaterializer {
    prompter: Arc<dyn Prompter>,
    /// Held for the whole prompt loop so two credentials never prompt at once.
    prompt_lock: Mutex<()>,
}

impl KeyMaterializer {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            prompter,
            prompt_lock: Mutex::new(()),
        }
    }

    async fn prompt(&self, message: String) -> Result<String> {
        let prompter = Arc::clone(&self.prompter);
        tokio::task::spawn_blocking(move || prompter.prompt_secret(&message))
            .await
            .map_err(|e| CredentialError::Prompt(e.to_string()))?
    }

    /// Decode key text, prompting for the passphrase when the configured one
    /// is missing or wrong.
    async fn decode_key(
        &self,
        label: &str,
        data: &str,
        passphrase: Option<&Secret>,
    ) -> Result<ssh_key::PrivateKey> {
        let passphrase = match passphrase {
            Some(secret) => Some(resolve_secret(secret).await?),
            None => None,
        };

        match decode_secret_key(data, passphrase.as_deref()) {
            Ok(key) => return Ok(key),
            Err(russh::keys::Error::KeyIsEncrypted) => {}
            Err(e) if passphrase.is_some() => {
                tracing::debug!(key = label, error = %e, "configured passphrase rejected");
            }
            Err(e) => {
                return Err(CredentialError::KeyRead {
                    identity: label.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        let _guard = self.prompt_lock.lock().await;
        for attempt in 1..=MAX_PROMPT_ATTEMPTS {
            let entered = self.prompt(format!("Passphrase for {label}")).await?;
            match decode_secret_key(data, Some(&entered)) {
                Ok(key) => return Ok(key),
                Err(e) => {
                    tracing::warn!(key = label, attempt, error = %e, "passphrase rejected");
                }
            }
        }

        Err(CredentialError::WrongPassphrase {
            identity: label.to_string(),
            attempts: MAX_PROMPT_ATTEMPTS,
        })
    }

    async fn key_file(&self, path: &Path, passphrase: Option<&Secret>) -> Result<CredentialMaterial> {
        let label = path.display().to_string();
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CredentialError::KeyRead {
                identity: label.clone(),
                reason: e.to_string(),
            })?;
        let key = self.decode_key(&label, &data, passphrase).await?;
        Ok(CredentialMaterial::PrivateKey(Arc::new(key)))
    }

    async fn key_command(
        &self,
        command: &str,
        passphrase: Option<&Secret>,
    ) -> Result<CredentialMaterial> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| CredentialError::KeyCommand {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CredentialError::KeyCommand {
                command: command.to_string(),
                reason: format!("exited with {}", output.status),
            });
        }

        let data = String::from_utf8(output.stdout).map_err(|_| CredentialError::KeyCommand {
            command: command.to_string(),
            reason: "output is not valid UTF-8".to_string(),
        })?;
        let key = self.decode_key(command, &data, passphrase).await?;
        Ok(CredentialMaterial::PrivateKey(Arc::new(key)))
    }

    async fn pkcs11(&self, provider: &Path, pin: Option<&Secret>) -> Result<CredentialMaterial> {
        let provider_id = provider.display().to_string();
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| CredentialError::Agent(e.to_string()))?;

        if let Some(pin) = pin {
            let pin = resolve_secret(pin).await?;
            match agent.add_smartcard_key(&provider_id, pin.as_bytes(), &[]).await {
                Ok(()) => return Ok(CredentialMaterial::Pkcs11 { provider: provider.to_path_buf() }),
                Err(e) => {
                    tracing::debug!(provider = %provider_id, error = %e, "configured PIN rejected");
                }
            }
        }

        let _guard = self.prompt_lock.lock().await;
        let mut last_error = String::new();
        for attempt in 1..=MAX_PROMPT_ATTEMPTS {
            let pin = self.prompt(format!("PIN for {provider_id}")).await?;
            match agent.add_smartcard_key(&provider_id, pin.as_bytes(), &[]).await {
                Ok(()) => {
                    tracing::info!(provider = %provider_id, "loaded PKCS#11 provider into agent");
                    return Ok(CredentialMaterial::Pkcs11 {
                        provider: provider.to_path_buf(),
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = %provider_id, attempt, error = %e, "PIN rejected");
                    last_error = e.to_string();
                }
            }
        }

        Err(CredentialError::Pkcs11 {
            provider: provider_id,
            reason: last_error,
        })
    }
}

#[async_trait]
impl Materializer for KeyMaterializer {
    async fn materialize(&self, descriptor: &CredentialDescriptor) -> Result<CredentialMaterial> {
        match descriptor {
            CredentialDescriptor::Password(secret) => {
                Ok(CredentialMaterial::Password(resolve_secret(secret).await?))
            }
            CredentialDescriptor::Key { path, passphrase } => {
                self.key_file(path, passphrase.as_ref()).await
            }
            CredentialDescriptor::KeyCommand {
                command,
                passphrase,
            } => self.key_command(command, passphrase.as_ref()).await,
            CredentialDescriptor::Certificate { cert, .. } => Err(CredentialError::Certificate {
                path: cert.display().to_string(),
                reason: "certificates are materialized together with their signing key".to_string(),
            }),
            CredentialDescriptor::Pkcs11 { provider, pin } => {
                self.pkcs11(provider, pin.as_ref()).await
            }
            CredentialDescriptor::Agent => {
                AgentClient::connect_env()
                    .await
                    .map_err(|e| CredentialError::Agent(e.to_string()))?;
                Ok(CredentialMaterial::Agent)
            }
        }
    }

    async fn certificate(
        &self,
        cert: &Path,
        signer: Arc<ssh_key::PrivateKey>,
    ) -> Result<CredentialMaterial> {
        let certificate = load_openssh_certificate(cert).map_err(|e| {
            CredentialError::Certificate {
                path: cert.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(CredentialMaterial::Certificate {
            key: signer,
            cert: Arc::new(certificate),
        })
    }
}

/// Resolve a secret off the async runtime, since it may run a command.
async fn resolve_secret(secret: &Secret) -> Result<String> {
    let secret = secret.clone();
    tokio::task::spawn_blocking(move || secret.resolve())
        .await
        .map_err(|e| CredentialError::Secret(e.to_string()))?
        .map_err(|e| CredentialError::Secret(e.to_string()))
}
