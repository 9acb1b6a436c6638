// ABOUTME: Host profiles: address, user, auth descriptors and proxy reference.
// ABOUTME: Parses "[user@]addr[:port]" shorthand and merges the defaults block.

use super::forward::ForwardRule;
use super::secret::Secret;
use crate::error::{Error, Result};
use crate::types::HostName;
use serde::Deserialize;
use std::fmt;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Transport used to reach a named proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Ssh,
    Http,
    Https,
    Socks5,
}

impl ProxyKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "ssh" => Some(ProxyKind::Ssh),
            "http" => Some(ProxyKind::Http),
            "https" => Some(ProxyKind::Https),
            "socks" | "socks5" => Some(ProxyKind::Socks5),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ProxyKind::Ssh => DEFAULT_SSH_PORT,
            ProxyKind::Http => 8080,
            ProxyKind::Https => 443,
            ProxyKind::Socks5 => 1080,
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyKind::Ssh => "ssh",
            ProxyKind::Http => "http",
            ProxyKind::Https => "https",
            ProxyKind::Socks5 => "socks5",
        })
    }
}

/// A named proxy together with the transport used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRef {
    pub name: HostName,
    pub kind: ProxyKind,
}

impl ProxyRef {
    pub(super) fn from_fields(
        owner: &str,
        proxy: Option<String>,
        proxy_type: Option<String>,
    ) -> Result<Option<Self>> {
        let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };

        let name = HostName::new(proxy.trim())
            .map_err(|e| Error::InvalidConfig(format!("{owner}: proxy {proxy:?}: {e}")))?;

        let raw_kind = proxy_type.unwrap_or_default();
        let kind = ProxyKind::parse(&raw_kind).ok_or_else(|| Error::InvalidProxyType {
            owner: owner.to_string(),
            value: raw_kind.clone(),
        })?;

        Ok(Some(ProxyRef { name, kind }))
    }
}

/// Authentication descriptors declared for one host, before materialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSettings {
    pub password: Option<Secret>,
    pub passwords: Vec<Secret>,
    pub key: Option<String>,
    pub key_passphrase: Option<Secret>,
    /// Entries in "path::passphrase" form; the passphrase part is optional.
    pub keys: Vec<String>,
    pub key_command: Option<String>,
    pub key_command_passphrase: Option<Secret>,
    pub cert: Option<String>,
    pub cert_key: Option<String>,
    pub cert_key_passphrase: Option<Secret>,
    pub pkcs11_provider: Option<String>,
    pub pkcs11_pin: Option<Secret>,
    pub agent: bool,
}

impl AuthSettings {
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.passwords.is_empty()
            && self.key.is_none()
            && self.keys.is_empty()
            && self.key_command.is_none()
            && self.cert.is_none()
            && self.pkcs11_provider.is_none()
            && !self.agent
    }
}

#[derive(Debug, Clone)]
pub struct HostProfile {
    pub name: HostName,
    pub addr: String,
    pub port: u16,
    pub user: Option<String>,
    pub auth: AuthSettings,
    pub proxy: Option<ProxyRef>,
    pub proxy_command: Option<String>,
    pub local_forwards: Vec<ForwardRule>,
    pub remote_forwards: Vec<ForwardRule>,
    pub note: Option<String>,
}

impl HostProfile {
    /// Login user, falling back to the local user name.
    pub fn login_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    /// Expand `%h %p %r %n %%` in the configured proxy command.
    pub fn expanded_proxy_command(&self) -> Option<String> {
        let template = self.proxy_command.as_deref()?;
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('h') => out.push_str(&self.addr),
                Some('p') => out.push_str(&self.port.to_string()),
                Some('r') => out.push_str(&self.login_user()),
                Some('n') => out.push_str(self.name.as_str()),
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }

        Some(out)
    }
}

/// Raw host fields as written in the configuration file. Every field is
/// optional so the same shape serves for `defaults` and for host entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSettings {
    pub addr: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<Secret>,
    #[serde(default)]
    pub passwords: Vec<Secret>,
    pub key: Option<String>,
    pub key_passphrase: Option<Secret>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub key_command: Option<String>,
    pub key_command_passphrase: Option<Secret>,
    pub cert: Option<String>,
    pub cert_key: Option<String>,
    pub cert_key_passphrase: Option<Secret>,
    pub pkcs11_provider: Option<String>,
    pub pkcs11_pin: Option<Secret>,
    pub agent: Option<bool>,
    pub proxy: Option<String>,
    pub proxy_type: Option<String>,
    pub proxy_command: Option<String>,
    #[serde(default)]
    pub local_forwards: Vec<String>,
    #[serde(default)]
    pub remote_forwards: Vec<String>,
    pub note: Option<String>,
}

impl HostSettings {
    /// Parse the "[user@]addr[:port]" shorthand. IPv6 addresses take a port
    /// only in brackets ("[::1]:2222"); a bare one is never split.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let parse_port = |port_str: &str| {
            port_str
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {port_str}"))
        };

        let (addr, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (addr, after) = bracketed
                .split_once(']')
                .ok_or_else(|| format!("unclosed '[' in address: {rest}"))?;
            match after {
                "" => (addr, None),
                _ => match after.strip_prefix(':') {
                    Some(port_str) => (addr, Some(parse_port(port_str)?)),
                    None => return Err(format!("unexpected text after address: {after}")),
                },
            }
        } else if rest.matches(':').count() > 1 {
            (rest, None)
        } else {
            match rest.rsplit_once(':') {
                Some((addr, port_str)) => (addr, Some(parse_port(port_str)?)),
                None => (rest, None),
            }
        };

        if addr.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        Ok(HostSettings {
            addr: Some(addr.to_string()),
            port,
            user: user_part.filter(|u| !u.is_empty()).map(str::to_string),
            ..HostSettings::default()
        })
    }

    /// Build the final profile, taking connection and auth fields the host
    /// leaves unset from `defaults`. Proxy, forward and note fields are never
    /// inherited.
    pub fn into_profile(self, name: HostName, defaults: &HostSettings) -> Result<HostProfile> {
        let owner = format!("host {name}");
        let d = defaults.clone();

        let auth = AuthSettings {
            password: self.password.or(d.password),
            passwords: non_empty_or(self.passwords, d.passwords),
            key: self.key.or(d.key),
            key_passphrase: self.key_passphrase.or(d.key_passphrase),
            keys: non_empty_or(self.keys, d.keys),
            key_command: self.key_command.or(d.key_command),
            key_command_passphrase: self.key_command_passphrase.or(d.key_command_passphrase),
            cert: self.cert.or(d.cert),
            cert_key: self.cert_key.or(d.cert_key),
            cert_key_passphrase: self.cert_key_passphrase.or(d.cert_key_passphrase),
            pkcs11_provider: self.pkcs11_provider.or(d.pkcs11_provider),
            pkcs11_pin: self.pkcs11_pin.or(d.pkcs11_pin),
            agent: self.agent.or(d.agent).unwrap_or(false),
        };

        let proxy = ProxyRef::from_fields(&owner, self.proxy, self.proxy_type)?;
        let proxy_command = self.proxy_command.filter(|c| !c.trim().is_empty());

        if proxy.is_some() && proxy_command.is_some() {
            return Err(Error::InvalidConfig(format!(
                "{owner}: proxy and proxy_command are mutually exclusive"
            )));
        }

        Ok(HostProfile {
            addr: self.addr.unwrap_or_else(|| name.to_string()),
            port: self.port.or(d.port).unwrap_or(DEFAULT_SSH_PORT),
            user: self.user.or(d.user),
            auth,
            proxy,
            proxy_command,
            local_forwards: parse_rules(&owner, &self.local_forwards)?,
            remote_forwards: parse_rules(&owner, &self.remote_forwards)?,
            note: self.note,
            name,
        })
    }
}

fn non_empty_or<T>(own: Vec<T>, inherited: Vec<T>) -> Vec<T> {
    if own.is_empty() { inherited } else { own }
}

fn parse_rules(owner: &str, rules: &[String]) -> Result<Vec<ForwardRule>> {
    rules
        .iter()
        .map(|r| ForwardRule::parse(r).map_err(|e| Error::InvalidForward(format!("{owner}: {e}"))))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum HostEntry {
    Simple(String),
    Detailed(HostSettings),
}

impl HostEntry {
    pub(super) fn into_settings(self) -> std::result::Result<HostSettings, String> {
        match self {
            HostEntry::Simple(s) => HostSettings::parse(&s),
            HostEntry::Detailed(c) => Ok(c),
        }
    }
}
