// ABOUTME: Credential descriptors, identity keys and realized authentication material.
// ABOUTME: Descriptors come from host settings in a fixed precedence order.

use crate::config::{AuthSettings, Secret, expand_path};
use russh::keys::ssh_key;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKind {
    Password,
    Key,
    KeyCommand,
    Certificate,
    Pkcs11,
    Agent,
}

impl CredentialKind {
    /// Lower ranks are offered to the server first.
    pub fn priority(self) -> u8 {
        match self {
            CredentialKind::Key
            | CredentialKind::KeyCommand
            | CredentialKind::Certificate
            | CredentialKind::Pkcs11 => 0,
            CredentialKind::Password => 1,
            CredentialKind::Agent => 2,
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialKind::Password => "password",
            CredentialKind::Key => "key",
            CredentialKind::KeyCommand => "key-command",
            CredentialKind::Certificate => "certificate",
            CredentialKind::Pkcs11 => "pkcs11",
            CredentialKind::Agent => "agent",
        })
    }
}

/// Content address of a credential. Two hosts that name the same key file
/// with the same passphrase produce equal keys.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub kind: CredentialKind,
    pub identity: String,
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialKey({}, ", self.kind)?;
        match self.kind {
            CredentialKind::Password => f.write_str("<redacted>)"),
            _ => {
                // Passphrase sources follow "::" and stay out of logs.
                let shown = self.identity.split("::").next().unwrap_or_default();
                write!(f, "{shown})")
            }
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialDescriptor {
    Password(Secret),
    Key {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
    KeyCommand {
        command: String,
        passphrase: Option<Secret>,
    },
    Certificate {
        cert: PathBuf,
        key: PathBuf,
        passphrase: Option<Secret>,
    },
    Pkcs11 {
        provider: PathBuf,
        pin: Option<Secret>,
    },
    Agent,
}

fn secret_identity(secret: &Option<Secret>) -> String {
    secret.as_ref().map(Secret::identity).unwrap_or_default()
}

impl CredentialDescriptor {
    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialDescriptor::Password(_) => CredentialKind::Password,
            CredentialDescriptor::Key { .. } => CredentialKind::Key,
            CredentialDescriptor::KeyCommand { .. } => CredentialKind::KeyCommand,
            CredentialDescriptor::Certificate { .. } => CredentialKind::Certificate,
            CredentialDescriptor::Pkcs11 { .. } => CredentialKind::Pkcs11,
            CredentialDescriptor::Agent => CredentialKind::Agent,
        }
    }

    pub fn key(&self) -> CredentialKey {
        let identity = match self {
            CredentialDescriptor::Password(secret) => secret.identity(),
            CredentialDescriptor::Key { path, passphrase } => {
                format!("{}::{}", path.display(), secret_identity(passphrase))
            }
            CredentialDescriptor::KeyCommand {
                command,
                passphrase,
            } => format!("{command}::{}", secret_identity(passphrase)),
            CredentialDescriptor::Certificate {
                cert,
                key,
                passphrase,
            } => format!(
                "{}+{}::{}",
                cert.display(),
                key.display(),
                secret_identity(passphrase)
            ),
            CredentialDescriptor::Pkcs11 { provider, .. } => provider.display().to_string(),
            CredentialDescriptor::Agent => "ssh-agent".to_string(),
        };

        CredentialKey {
            kind: self.kind(),
            identity,
        }
    }

    /// Descriptors for one host in their fixed precedence: password, passwords,
    /// key, keys, key command, certificate, PKCS#11, agent. Duplicates are dropped.
    pub fn from_settings(auth: &AuthSettings) -> Vec<CredentialDescriptor> {
        let mut out = Vec::new();

        if let Some(password) = &auth.password {
            out.push(CredentialDescriptor::Password(password.clone()));
        }
        for password in &auth.passwords {
            out.push(CredentialDescriptor::Password(password.clone()));
        }

        if let Some(key) = &auth.key {
            out.push(CredentialDescriptor::Key {
                path: expand_path(key),
                passphrase: auth.key_passphrase.clone(),
            });
        }
        for entry in &auth.keys {
            let (path, passphrase) = match entry.split_once("::") {
                Some((path, pass)) if !pass.is_empty() => (path, Some(Secret::from(pass))),
                Some((path, _)) => (path, None),
                None => (entry.as_str(), None),
            };
            out.push(CredentialDescriptor::Key {
                path: expand_path(path),
                passphrase,
            });
        }

        if let Some(command) = &auth.key_command {
            out.push(CredentialDescriptor::KeyCommand {
                command: command.clone(),
                passphrase: auth.key_command_passphrase.clone(),
            });
        }

        if let Some(cert) = &auth.cert {
            let key = auth
                .cert_key
                .clone()
                .unwrap_or_else(|| cert.trim_end_matches("-cert.pub").to_string());
            out.push(CredentialDescriptor::Certificate {
                cert: expand_path(cert),
                key: expand_path(&key),
                passphrase: auth.cert_key_passphrase.clone(),
            });
        }

        if let Some(provider) = &auth.pkcs11_provider {
            out.push(CredentialDescriptor::Pkcs11 {
                provider: expand_path(provider),
                pin: auth.pkcs11_pin.clone(),
            });
        }

        if auth.agent {
            out.push(CredentialDescriptor::Agent);
        }

        let mut seen = std::collections::HashSet::new();
        out.retain(|d| seen.insert(d.key()));
        out
    }
}

/// Realized authentication method, shared by every host that uses it.
pub enum CredentialMaterial {
    Password(String),
    PrivateKey(Arc<ssh_key::PrivateKey>),
    Certificate {
        key: Arc<ssh_key::PrivateKey>,
        cert: Arc<ssh_key::Certificate>,
    },
    Agent,
    /// Provider keys were loaded into the running agent; signing goes through it.
    Pkcs11 {
        provider: PathBuf,
    },
}

impl CredentialMaterial {
    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialMaterial::Password(_) => CredentialKind::Password,
            CredentialMaterial::PrivateKey(_) => CredentialKind::Key,
            CredentialMaterial::Certificate { .. } => CredentialKind::Certificate,
            CredentialMaterial::Agent => CredentialKind::Agent,
            CredentialMaterial::Pkcs11 { .. } => CredentialKind::Pkcs11,
        }
    }
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialMaterial::Password(_) => f.write_str("Password(<redacted>)"),
            CredentialMaterial::PrivateKey(key) => {
                write!(f, "PrivateKey({})", key.algorithm())
            }
            CredentialMaterial::Certificate { cert, .. } => {
                write!(f, "Certificate({})", cert.key_id())
            }
            CredentialMaterial::Agent => f.write_str("Agent"),
            CredentialMaterial::Pkcs11 { provider } => {
                write!(f, "Pkcs11({})", provider.display())
            }
        }
    }
}

/// Ordered credentials for one host, plus the descriptors that could not be realized.
#[derive(Debug, Clone, Default)]
pub struct HostAuthSet {
    methods: Vec<(CredentialKey, Arc<CredentialMaterial>)>,
    failures: Vec<(CredentialKey, Arc<CredentialError>)>,
}

impl HostAuthSet {
    pub(super) fn push(&mut self, key: CredentialKey, material: Arc<CredentialMaterial>) {
        self.methods.push((key, material));
    }

    pub(super) fn push_failure(&mut self, key: CredentialKey, error: Arc<CredentialError>) {
        self.failures.push((key, error));
    }

    /// Stable sort by priority so descriptor order survives within a rank.
    pub(super) fn finish(mut self) -> Self {
        self.methods.sort_by_key(|(key, _)| key.kind.priority());
        self
    }

    pub fn methods(&self) -> &[(CredentialKey, Arc<CredentialMaterial>)] {
        &self.methods
    }

    pub fn failures(&self) -> &[(CredentialKey, Arc<CredentialError>)] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }
}
