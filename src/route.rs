// ABOUTME: Proxy route resolution: the ordered chain of hops needed to reach a host.
// ABOUTME: Walks proxy references from the target outward, detects cycles, then reverses.

use crate::config::{Config, HostProfile, ProxyKind, ProxyProfile, ProxyRef};
use crate::types::HostName;
use nonempty::NonEmpty;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    Ssh,
    Http,
    Https,
    Socks5,
    /// Local subprocess whose stdin/stdout carry the connection.
    Command,
}

impl From<ProxyKind> for HopKind {
    fn from(kind: ProxyKind) -> Self {
        match kind {
            ProxyKind::Ssh => HopKind::Ssh,
            ProxyKind::Http => HopKind::Http,
            ProxyKind::Https => HopKind::Https,
            ProxyKind::Socks5 => HopKind::Socks5,
        }
    }
}

impl fmt::Display for HopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HopKind::Ssh => "ssh",
            HopKind::Http => "http",
            HopKind::Https => "https",
            HopKind::Socks5 => "socks5",
            HopKind::Command => "command",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHop {
    pub name: HostName,
    pub kind: HopKind,
}

impl fmt::Display for ProxyHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.kind)
    }
}

/// Hops ordered from the one nearest the operator to the target, which is
/// always the last hop and always `ssh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    hops: NonEmpty<ProxyHop>,
}

impl Route {
    pub fn hops(&self) -> &NonEmpty<ProxyHop> {
        &self.hops
    }

    pub fn target(&self) -> &ProxyHop {
        self.hops.last()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_direct(&self) -> bool {
        self.hops.len() == 1
    }

    pub fn names(&self) -> Vec<&str> {
        self.hops.iter().map(|hop| hop.name.as_str()).collect()
    }

    /// Names of every hop that performs an SSH handshake and therefore needs credentials.
    pub fn ssh_hosts(&self) -> impl Iterator<Item = &HostName> {
        self.hops
            .iter()
            .filter(|hop| hop.kind == HopKind::Ssh)
            .map(|hop| &hop.name)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.hops.iter().map(ProxyHop::to_string).collect();
        f.write_str(&parts.join(" -> "))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("{from} references {kind} proxy {name:?}, which is not defined")]
    Unresolved {
        from: String,
        name: String,
        kind: ProxyKind,
    },

    #[error("proxy cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Namespace {
    Host,
    Proxy,
}

#[derive(Clone, Copy)]
enum Node<'a> {
    Host(&'a HostProfile),
    Proxy(&'a ProxyProfile),
}

impl<'a> Node<'a> {
    fn name(self) -> &'a HostName {
        match self {
            Node::Host(h) => &h.name,
            Node::Proxy(p) => &p.name,
        }
    }

    fn proxy(self) -> Option<&'a ProxyRef> {
        match self {
            Node::Host(h) => h.proxy.as_ref(),
            Node::Proxy(p) => p.proxy.as_ref(),
        }
    }

    fn has_proxy_command(self) -> bool {
        matches!(self, Node::Host(h) if h.proxy_command.is_some())
    }
}

pub fn resolve_route(host: &str, config: &Config) -> Result<Route, RouteError> {
    let target = config
        .hosts
        .get(host)
        .ok_or_else(|| RouteError::UnknownHost(host.to_string()))?;

    let mut visited = HashSet::from([(Namespace::Host, target.name.clone())]);
    let mut chain = vec![ProxyHop {
        name: target.name.clone(),
        kind: HopKind::Ssh,
    }];
    let mut current = Node::Host(target);

    loop {
        // A proxy command creates the raw socket, so nothing can sit in front of it.
        if current.has_proxy_command() {
            chain.push(ProxyHop {
                name: current.name().clone(),
                kind: HopKind::Command,
            });
            break;
        }

        let Some(next) = current.proxy() else {
            break;
        };

        let (namespace, node) = match next.kind {
            ProxyKind::Ssh => (
                Namespace::Host,
                config.hosts.get(&next.name).map(Node::Host),
            ),
            _ => (
                Namespace::Proxy,
                config.proxies.get(&next.name).map(Node::Proxy),
            ),
        };

        let node = node.ok_or_else(|| RouteError::Unresolved {
            from: current.name().to_string(),
            name: next.name.to_string(),
            kind: next.kind,
        })?;

        if !visited.insert((namespace, next.name.clone())) {
            let mut names: Vec<String> = chain
                .iter()
                .filter(|hop| hop.kind != HopKind::Command)
                .map(|hop| hop.name.to_string())
                .collect();
            names.push(next.name.to_string());
            return Err(RouteError::Cycle { chain: names });
        }

        chain.push(ProxyHop {
            name: next.name.clone(),
            kind: next.kind.into(),
        });
        current = node;
    }

    chain.reverse();
    tracing::debug!(host, hops = chain.len(), "resolved route");

    let hops = NonEmpty::from_vec(chain).ok_or_else(|| RouteError::UnknownHost(host.to_string()))?;
    Ok(Route { hops })
}
