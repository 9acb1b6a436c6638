// ABOUTME: Walks a resolved route hop by hop, layering each transport on the previous one.
// ABOUTME: Every stage runs under the connect timeout; failures name the hop and the stage.

use super::agent;
use super::client::{RemoteTargets, Session, SshHandler};
use super::error::{Error, HopStage, Result};
use super::transport::{self, BoxedStream, CommandStream, ProxyCredentials};
use crate::auth::{CredentialMaterial, HostAuthSet};
use crate::config::{Config, ProxyKind, ProxyProfile};
use crate::route::{HopKind, ProxyHop, Route};
use crate::types::HostName;
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Connection settings shared by every hop.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Option<Duration>,
    pub keepalive_interval: Option<Duration>,
    pub trust_on_first_use: bool,
    pub known_hosts_path: Option<PathBuf>,
}

impl From<&Config> for ConnectOptions {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            keepalive_interval: config.keepalive_interval,
            trust_on_first_use: config.trust_first_connection,
            known_hosts_path: config.known_hosts.clone(),
        }
    }
}

impl ConnectOptions {
    fn russh_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: self.keepalive_interval,
            ..Default::default()
        })
    }
}

async fn staged<T, E, F>(hop: &ProxyHop, stage: HopStage, limit: Duration, work: F) -> Result<T>
where
    E: Display,
    F: Future<Output = std::result::Result<T, E>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::hop(hop, stage, e)),
        Err(_) => Err(Error::hop(hop, stage, format!("timed out after {limit:?}"))),
    }
}

/// Establish an authenticated session to the route's target.
pub async fn connect(
    route: &Route,
    config: &Config,
    auth_sets: &HashMap<HostName, HostAuthSet>,
) -> Result<Session> {
    let options = ConnectOptions::from(config);
    let hops: Vec<&ProxyHop> = route.hops().iter().collect();
    tracing::debug!(route = %route, "connecting");

    let mut pending: Option<BoxedStream> = None;
    let mut jumps: Vec<Handle<SshHandler>> = Vec::new();
    let mut target_remotes = RemoteTargets::default();

    for (index, hop) in hops.iter().copied().enumerate() {
        match hop.kind {
            HopKind::Command => {
                let profile = config
                    .hosts
                    .get(&hop.name)
                    .ok_or_else(|| Error::hop(hop, HopStage::Dial, "unknown host"))?;
                let command = profile
                    .expanded_proxy_command()
                    .ok_or_else(|| Error::hop(hop, HopStage::Dial, "no proxy_command configured"))?;
                tracing::debug!(hop = %hop, command = %command, "spawning proxy command");
                let stream = CommandStream::spawn(&command).map_err(|e| Error::hop(hop, HopStage::Dial, e))?;
                pending = Some(Box::new(stream));
            }
            HopKind::Http | HopKind::Https | HopKind::Socks5 => {
                let proxy = config
                    .proxies
                    .get(&hop.name)
                    .ok_or_else(|| Error::hop(hop, HopStage::Dial, "unknown proxy"))?;
                let next = hops
                    .get(index + 1)
                    .copied()
                    .ok_or_else(|| Error::hop(hop, HopStage::Tunnel, "proxy is the last hop"))?;
                let (next_addr, next_port) = endpoint(next, config)?;

                let stream = proxy_stream(hop, proxy, pending.take(), jumps.last(), &options).await?;
                let credentials = proxy_credentials(hop, proxy).await?;

                let tunnel = async {
                    match hop.kind {
                        HopKind::Socks5 => {
                            transport::socks5_connect(stream, &next_addr, next_port, credentials.as_ref()).await
                        }
                        _ => transport::http_connect(stream, &next_addr, next_port, credentials.as_ref()).await,
                    }
                };
                let stream = staged(hop, HopStage::Tunnel, options.connect_timeout, tunnel).await?;
                tracing::debug!(hop = %hop, to = %format!("{next_addr}:{next_port}"), "tunnel established");
                pending = Some(stream);
            }
            HopKind::Ssh => {
                let profile = config
                    .hosts
                    .get(&hop.name)
                    .ok_or_else(|| Error::hop(hop, HopStage::Dial, "unknown host"))?;

                let stream = match pending.take() {
                    Some(stream) => stream,
                    None => open_stream(hop, jumps.last(), &profile.addr, profile.port, &options).await?,
                };

                let remotes = RemoteTargets::default();
                let handler = SshHandler::new(
                    profile.addr.clone(),
                    profile.port,
                    options.trust_on_first_use,
                    options.known_hosts_path.clone(),
                    Arc::clone(&remotes),
                );
                let mut handle = staged(
                    hop,
                    HopStage::Handshake,
                    options.connect_timeout,
                    client::connect_stream(options.russh_config(), stream, handler),
                )
                .await?;

                let user = profile.login_user();
                staged(
                    hop,
                    HopStage::Authentication,
                    options.connect_timeout,
                    authenticate(&mut handle, &user, auth_sets.get(&hop.name)),
                )
                .await?;
                tracing::debug!(hop = %hop, user = %user, "authenticated");

                jumps.push(handle);
                target_remotes = remotes;
            }
        }
    }

    let target = route.target();
    let handle = jumps
        .pop()
        .ok_or_else(|| Error::hop(target, HopStage::Dial, "route has no ssh hop"))?;

    Ok(Session::new(
        target.name.clone(),
        handle,
        jumps,
        target_remotes,
        options.command_timeout,
    ))
}

/// Where a hop listens.
fn endpoint(hop: &ProxyHop, config: &Config) -> Result<(String, u16)> {
    match hop.kind {
        HopKind::Ssh | HopKind::Command => config
            .hosts
            .get(&hop.name)
            .map(|h| (h.addr.clone(), h.port))
            .ok_or_else(|| Error::hop(hop, HopStage::Dial, "unknown host")),
        HopKind::Http | HopKind::Https | HopKind::Socks5 => {
            let kind = match hop.kind {
                HopKind::Http => ProxyKind::Http,
                HopKind::Https => ProxyKind::Https,
                _ => ProxyKind::Socks5,
            };
            config
                .proxies
                .get(&hop.name)
                .map(|p| (p.addr.clone(), p.port_for(kind)))
                .ok_or_else(|| Error::hop(hop, HopStage::Dial, "unknown proxy"))
        }
    }
}

/// Reach `addr:port` through the previous SSH hop, or directly when there is none.
async fn open_stream(
    hop: &ProxyHop,
    jump: Option<&Handle<SshHandler>>,
    addr: &str,
    port: u16,
    options: &ConnectOptions,
) -> Result<BoxedStream> {
    match jump {
        Some(jump) => {
            let open = jump.channel_open_direct_tcpip(addr.to_string(), port as u32, "127.0.0.1", 0);
            let channel = staged(hop, HopStage::Dial, options.connect_timeout, open).await?;
            Ok(Box::new(channel.into_stream()))
        }
        None => staged(hop, HopStage::Dial, options.connect_timeout, transport::dial_tcp(addr, port)).await,
    }
}

async fn proxy_stream(
    hop: &ProxyHop,
    proxy: &ProxyProfile,
    pending: Option<BoxedStream>,
    jump: Option<&Handle<SshHandler>>,
    options: &ConnectOptions,
) -> Result<BoxedStream> {
    let kind = match hop.kind {
        HopKind::Https => ProxyKind::Https,
        HopKind::Socks5 => ProxyKind::Socks5,
        _ => ProxyKind::Http,
    };
    let stream = match pending {
        Some(stream) => stream,
        None => open_stream(hop, jump, &proxy.addr, proxy.port_for(kind), options).await?,
    };

    if hop.kind == HopKind::Https {
        staged(
            hop,
            HopStage::Tunnel,
            options.connect_timeout,
            transport::tls_wrap(stream, &proxy.addr),
        )
        .await
    } else {
        Ok(stream)
    }
}

/// Secrets may run a command, so they resolve off the async workers.
async fn proxy_credentials(hop: &ProxyHop, proxy: &ProxyProfile) -> Result<Option<ProxyCredentials>> {
    let (Some(user), Some(password)) = (&proxy.user, &proxy.password) else {
        return Ok(None);
    };
    let password = password.clone();
    let password = tokio::task::spawn_blocking(move || password.resolve())
        .await
        .map_err(|e| Error::hop(hop, HopStage::Tunnel, e))?
        .map_err(|e| Error::hop(hop, HopStage::Tunnel, e))?;
    Ok(Some(ProxyCredentials {
        user: user.clone(),
        password,
    }))
}

/// One credential offered to a connected server.
#[async_trait]
trait Authenticator: Send {
    async fn offer(&mut self, user: &str, material: &CredentialMaterial) -> std::result::Result<bool, String>;
}

#[async_trait]
impl Authenticator for Handle<SshHandler> {
    async fn offer(&mut self, user: &str, material: &CredentialMaterial) -> std::result::Result<bool, String> {
        let result = match material {
            CredentialMaterial::Password(password) => self.authenticate_password(user, password).await,
            CredentialMaterial::PrivateKey(private) => {
                let hash_alg = self
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| e.to_string())?
                    .flatten();
                self.authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::clone(private), hash_alg))
                    .await
            }
            CredentialMaterial::Certificate { key, cert } => {
                self.authenticate_openssh_cert(user, Arc::clone(key), cert.as_ref().clone())
                    .await
            }
            CredentialMaterial::Agent | CredentialMaterial::Pkcs11 { .. } => {
                return agent::authenticate(self, user).await;
            }
        };
        result.map(|r| r.success()).map_err(|e| e.to_string())
    }
}

/// Offer the host's methods in priority order until the server accepts one.
/// A method that errors is logged and skipped like a rejected one.
async fn authenticate<A: Authenticator>(
    conn: &mut A,
    user: &str,
    auth: Option<&HostAuthSet>,
) -> std::result::Result<(), String> {
    let Some(auth) = auth.filter(|set| !set.is_empty()) else {
        return Err("no usable credentials".to_string());
    };

    let mut agent_tried = false;
    let mut rejected = Vec::new();

    for (key, material) in auth.methods() {
        if matches!(material.as_ref(), CredentialMaterial::Agent | CredentialMaterial::Pkcs11 { .. }) {
            if agent_tried {
                continue;
            }
            agent_tried = true;
        }

        match conn.offer(user, material).await {
            Ok(true) => {
                tracing::debug!(method = %key, "credential accepted");
                return Ok(());
            }
            Ok(false) => rejected.push(key.to_string()),
            Err(e) => {
                tracing::warn!(method = %key, error = %e, "authentication method failed");
                rejected.push(format!("{key} ({e})"));
            }
        }
    }

    Err(format!("all methods rejected: {}", rejected.join(", ")))
}
