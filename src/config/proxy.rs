// ABOUTME: Non-SSH proxy entries (http, https, socks5).
// ABOUTME: A proxy may itself be reached through a further proxy.

use super::host::{ProxyKind, ProxyRef};
use super::secret::Secret;
use crate::error::Result;
use crate::types::HostName;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ProxyProfile {
    pub name: HostName,
    pub addr: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<Secret>,
    pub proxy: Option<ProxyRef>,
}

impl ProxyProfile {
    /// Configured port, or the conventional port for the transport.
    pub fn port_for(&self, kind: ProxyKind) -> u16 {
        self.port.unwrap_or_else(|| kind.default_port())
    }

    pub fn has_credentials(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ProxySettings {
    addr: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<Secret>,
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default)]
    proxy_type: Option<String>,
}

impl ProxySettings {
    pub(super) fn into_profile(self, name: HostName) -> Result<ProxyProfile> {
        let proxy = ProxyRef::from_fields(&format!("proxy {name}"), self.proxy, self.proxy_type)?;
        Ok(ProxyProfile {
            name,
            addr: self.addr,
            port: self.port,
            user: self.user,
            password: self.password,
            proxy,
        })
    }
}
