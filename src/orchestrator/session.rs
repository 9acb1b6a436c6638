// ABOUTME: The seam between orchestration and transport: connectors, remote sessions, session I/O.
// ABOUTME: SshConnector binds the seam to resolved routes and the shared credential sets.

use crate::auth::HostAuthSet;
use crate::config::{Config, ForwardRule};
use crate::output::{HostLabel, HostWriter};
use crate::route::resolve_route;
use crate::ssh::{self, HopStage};
use crate::transfer::RemoteFs;
use crate::types::HostName;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};

/// Terminal requested for an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

/// Where a remote session's stdin comes from.
pub enum StdinSource {
    /// Remote stdin sees EOF immediately.
    Closed,
    Owned(mpsc::Receiver<Bytes>),
    /// One stdin stream handed from host to host in sequential runs.
    Shared(Arc<Mutex<mpsc::Receiver<Bytes>>>),
}

impl StdinSource {
    pub fn is_closed(&self) -> bool {
        matches!(self, StdinSource::Closed)
    }

    /// Next chunk of input, or `None` once input is exhausted.
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self {
            StdinSource::Closed => None,
            StdinSource::Owned(rx) => rx.recv().await,
            StdinSource::Shared(rx) => rx.lock().await.recv().await,
        }
    }
}

/// Everything one remote session reads from and writes to.
pub struct SessionIo {
    pub stdout: HostWriter,
    pub stderr: HostWriter,
    pub stdin: StdinSource,
    pub pty: Option<PtyRequest>,
    pub resize: Option<mpsc::Receiver<(u16, u16)>>,
    pub cancel: watch::Receiver<bool>,
}

/// An authenticated connection to one host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command; returns the remote exit status.
    async fn exec(&mut self, command: &str, io: &mut SessionIo) -> Result<u32, ssh::Error>;
    async fn shell(&mut self, io: &mut SessionIo) -> Result<u32, ssh::Error>;
    async fn filesystem(&mut self) -> Result<Arc<dyn RemoteFs>, ssh::Error>;
    async fn forward(
        &mut self,
        local: &[ForwardRule],
        remote: &[ForwardRule],
        cancel: watch::Receiver<bool>,
    ) -> Result<(), ssh::Error>;
    async fn close(self: Box<Self>) -> Result<(), ssh::Error>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn label(&self, host: &HostName) -> HostLabel;
    async fn connect(&self, host: &HostName) -> Result<Box<dyn RemoteSession>, ssh::Error>;
}

/// Connects over resolved hop chains using credentials built before any
/// host work starts.
pub struct SshConnector {
    config: Arc<Config>,
    auth_sets: Arc<HashMap<HostName, HostAuthSet>>,
}

impl SshConnector {
    pub fn new(config: Arc<Config>, auth_sets: HashMap<HostName, HostAuthSet>) -> Self {
        Self {
            config,
            auth_sets: Arc::new(auth_sets),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn label(&self, host: &HostName) -> HostLabel {
        match self.config.hosts.get(host) {
            Some(profile) => HostLabel {
                name: host.clone(),
                addr: profile.addr.clone(),
                user: profile.login_user(),
                port: profile.port,
            },
            None => HostLabel {
                name: host.clone(),
                addr: host.to_string(),
                user: String::new(),
                port: crate::config::DEFAULT_SSH_PORT,
            },
        }
    }

    async fn connect(&self, host: &HostName) -> Result<Box<dyn RemoteSession>, ssh::Error> {
        let route = resolve_route(host.as_str(), &self.config)
            .map_err(|e| ssh::Error::hop(host, HopStage::Dial, e))?;
        let session = ssh::connect(&route, &self.config, &self.auth_sets).await?;
        Ok(Box::new(session))
    }
}

#[async_trait]
impl RemoteSession for ssh::Session {
    async fn exec(&mut self, command: &str, io: &mut SessionIo) -> Result<u32, ssh::Error> {
        self.run(Some(command), io).await
    }

    async fn shell(&mut self, io: &mut SessionIo) -> Result<u32, ssh::Error> {
        self.run(None, io).await
    }

    async fn filesystem(&mut self) -> Result<Arc<dyn RemoteFs>, ssh::Error> {
        Ok(Arc::new(self.sftp().await?))
    }

    async fn forward(
        &mut self,
        local: &[ForwardRule],
        remote: &[ForwardRule],
        cancel: watch::Receiver<bool>,
    ) -> Result<(), ssh::Error> {
        ssh::Session::forward(self, local, remote, cancel).await
    }

    async fn close(self: Box<Self>) -> Result<(), ssh::Error> {
        self.disconnect().await
    }
}
