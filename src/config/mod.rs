// ABOUTME: Configuration types and parsing for herd.yml.
// ABOUTME: Loads the host and proxy catalog, merges defaults, and validates it up front.

mod forward;
mod host;
mod proxy;
mod secret;

pub use forward::ForwardRule;
pub use host::{AuthSettings, DEFAULT_SSH_PORT, HostProfile, HostSettings, ProxyKind, ProxyRef};
pub use proxy::ProxyProfile;
pub use secret::Secret;

use crate::error::{Error, Result};
use crate::types::HostName;
use host::HostEntry;
use proxy::ProxySettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "herd.yml";
pub const CONFIG_FILENAME_ALT: &str = "herd.yaml";
pub const CONFIG_FILENAME_HOME: &str = ".config/herd/config.yml";

pub const DEFAULT_PROMPT: &str = "${SERVER} :: ";

#[derive(Debug, Clone)]
pub struct Config {
    pub hosts: BTreeMap<HostName, HostProfile>,
    pub proxies: BTreeMap<HostName, ProxyProfile>,
    pub output: OutputConfig,
    /// Applied to each hop separately.
    pub connect_timeout: Duration,
    pub command_timeout: Option<Duration>,
    pub keepalive_interval: Option<Duration>,
    pub known_hosts: Option<PathBuf>,
    pub trust_first_connection: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_color")]
    pub color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            color: default_color(),
        }
    }
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_color() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_trust_first_connection() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    defaults: HostSettings,
    #[serde(default)]
    hosts: BTreeMap<HostName, HostEntry>,
    #[serde(default)]
    proxies: BTreeMap<HostName, ProxySettings>,
    #[serde(default)]
    output: OutputConfig,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    connect_timeout: Duration,
    #[serde(default, with = "humantime_serde")]
    command_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    keepalive_interval: Option<Duration>,
    #[serde(default)]
    known_hosts: Option<String>,
    #[serde(default = "default_trust_first_connection")]
    trust_first_connection: bool,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;

        let hosts = raw
            .hosts
            .into_iter()
            .map(|(name, entry)| {
                let settings = entry
                    .into_settings()
                    .map_err(|e| Error::InvalidConfig(format!("host {name}: {e}")))?;
                let profile = settings.into_profile(name.clone(), &raw.defaults)?;
                Ok((name, profile))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let proxies = raw
            .proxies
            .into_iter()
            .map(|(name, settings)| Ok((name.clone(), settings.into_profile(name)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Config {
            hosts,
            proxies,
            output: raw.output,
            connect_timeout: raw.connect_timeout,
            command_timeout: raw.command_timeout,
            keepalive_interval: raw.keepalive_interval,
            known_hosts: raw.known_hosts.as_deref().map(expand_path),
            trust_first_connection: raw.trust_first_connection,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Look for a config file in `dir`, then in the user's home directory.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut candidates = vec![dir.join(CONFIG_FILENAME), dir.join(CONFIG_FILENAME_ALT)];
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(Path::new(&home).join(CONFIG_FILENAME_HOME));
        }

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    pub fn host(&self, name: &str) -> Result<&HostProfile> {
        self.hosts
            .get(name)
            .ok_or_else(|| Error::UnknownHost(name.to_string()))
    }

    /// Map operator-supplied names onto catalog entries, keeping their order,
    /// and validate the routes of exactly those hosts.
    pub fn select(&self, names: &[String]) -> Result<Vec<HostName>> {
        let selected = names
            .iter()
            .map(|name| self.host(name).map(|profile| profile.name.clone()))
            .collect::<Result<Vec<_>>>()?;
        self.validate_hosts(&selected)?;
        Ok(selected)
    }

    /// Validate every host in the catalog.
    pub fn validate(&self) -> Result<()> {
        let all: Vec<HostName> = self.hosts.keys().cloned().collect();
        self.validate_hosts(&all)
    }

    /// Check hosts before any connection is attempted: each needs a
    /// resolvable, acyclic route, and every SSH hop on it an auth method.
    fn validate_hosts(&self, hosts: &[HostName]) -> Result<()> {
        for name in hosts {
            let route = crate::route::resolve_route(name.as_str(), self)?;
            for hop in route.ssh_hosts() {
                if let Some(profile) = self.hosts.get(hop)
                    && profile.auth.is_empty()
                {
                    return Err(Error::EmptyAuth(hop.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
