// ABOUTME: SSH session management using russh.
// ABOUTME: Host key checking, streamed exec and shell channels, SFTP and port forwarding.

use super::error::{Error, Result};
use super::forward::{self, ForwardHandle};
use crate::config::ForwardRule;
use crate::orchestrator::SessionIo;
use crate::transfer::SftpFs;
use crate::types::HostName;
use parking_lot::Mutex;
use russh::client::{self, Handle};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use russh_sftp::client::SftpSession;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// How long a cancelled command gets to exit after SIGINT before the channel is dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Remote-forward listeners, keyed by the (address, port) the server bound,
/// mapped to the local target connections are bridged to.
pub(crate) type RemoteTargets = Arc<Mutex<HashMap<(String, u32), (String, u16)>>>;

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
    remote_targets: RemoteTargets,
}

impl SshHandler {
    pub(crate) fn new(
        host: String,
        port: u16,
        trust_on_first_use: bool,
        known_hosts_path: Option<PathBuf>,
        remote_targets: RemoteTargets,
    ) -> Self {
        Self {
            host,
            port,
            trust_on_first_use,
            known_hosts_path,
            remote_targets,
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) => {
                if !self.trust_on_first_use {
                    tracing::warn!(host = %self.host, port = self.port, "unknown host key rejected");
                    return Ok(false);
                }
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learn_result = match &self.known_hosts_path {
                    Some(path) => learn_known_hosts_path(&self.host, self.port, server_public_key, path),
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!(host = %self.host, port = self.port, "host key changed");
                Ok(false)
            }
            Err(e) => {
                tracing::debug!(host = %self.host, error = %e, "known_hosts lookup failed");
                Ok(self.trust_on_first_use)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        let target = {
            let targets = self.remote_targets.lock();
            targets
                .get(&(connected_address.to_string(), connected_port))
                .or_else(|| {
                    targets
                        .iter()
                        .find(|((_, port), _)| *port == connected_port)
                        .map(|(_, target)| target)
                })
                .cloned()
        };

        let Some(target) = target else {
            tracing::warn!(
                address = connected_address,
                port = connected_port,
                "forwarded connection for unknown listener"
            );
            return Ok(());
        };

        tracing::debug!(
            from = %format!("{originator_address}:{originator_port}"),
            to = %format!("{}:{}", target.0, target.1),
            "remote forward connection"
        );
        tokio::spawn(async move {
            if let Err(e) = forward::bridge_forwarded(channel, &target.0, target.1).await {
                tracing::debug!("Forward connection error: {}", e);
            }
        });
        Ok(())
    }
}

/// An established SSH session to a host, with the jump sessions it runs through.
pub struct Session {
    host: HostName,
    handle: Arc<Handle<SshHandler>>,
    /// Intermediate hops, nearest the operator first.
    jumps: Vec<Handle<SshHandler>>,
    remote_targets: RemoteTargets,
    forwarders: Mutex<Vec<ForwardHandle>>,
    command_timeout: Option<Duration>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("jumps", &self.jumps.len())
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

async fn next_resize(resize: &mut Option<mpsc::Receiver<(u16, u16)>>) -> Option<(u16, u16)> {
    match resize {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Session {
    pub(super) fn new(
        host: HostName,
        handle: Handle<SshHandler>,
        jumps: Vec<Handle<SshHandler>>,
        remote_targets: RemoteTargets,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            host,
            handle: Arc::new(handle),
            jumps,
            remote_targets,
            forwarders: Mutex::new(Vec::new()),
            command_timeout,
        }
    }

    pub fn host(&self) -> &HostName {
        &self.host
    }

    /// Run `command`, or a login shell when `None`, streaming through `io`.
    /// Returns the remote exit status.
    pub async fn run(&self, command: Option<&str>, io: &mut SessionIo) -> Result<u32> {
        match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_inner(command, io))
                .await
                .map_err(|_| Error::CommandTimeout(limit))?,
            None => self.run_inner(command, io).await,
        }
    }

    async fn run_inner(&self, command: Option<&str>, io: &mut SessionIo) -> Result<u32> {
        let mut cancel = io.cancel.clone();
        if *cancel.borrow_and_update() {
            return Err(Error::Cancelled);
        }

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(format!("failed to open channel: {e}")))?;

        if let Some(pty) = &io.pty {
            channel
                .request_pty(true, &pty.term, pty.cols as u32, pty.rows as u32, 0, 0, &[])
                .await
                .map_err(|e| Error::Channel(format!("failed to allocate pty: {e}")))?;
        }

        match command {
            Some(command) => channel.exec(true, command).await,
            None => channel.request_shell(true).await,
        }
        .map_err(|e| Error::Channel(format!("failed to start remote process: {e}")))?;

        let mut stdin_open = !io.stdin.is_closed();
        if !stdin_open {
            channel.eof().await?;
        }

        let mut cancel_live = true;
        let mut deadline: Option<Instant> = None;
        let mut exit_code = None;
        let mut got_eof = false;

        loop {
            tokio::select! {
                chunk = io.stdin.recv(), if stdin_open => match chunk {
                    Some(data) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            tracing::debug!(host = %self.host, error = %e, "stdin write failed");
                            stdin_open = false;
                        }
                    }
                    None => {
                        stdin_open = false;
                        let _ = channel.eof().await;
                    }
                },
                size = next_resize(&mut io.resize) => match size {
                    Some((cols, rows)) => {
                        channel.window_change(cols as u32, rows as u32, 0, 0).await?;
                    }
                    None => io.resize = None,
                },
                changed = cancel.changed(), if cancel_live && deadline.is_none() => {
                    if changed.is_err() {
                        cancel_live = false;
                    } else if *cancel.borrow_and_update() {
                        tracing::debug!(host = %self.host, "interrupting remote process");
                        let _ = channel.signal(Sig::INT).await;
                        deadline = Some(Instant::now() + CANCEL_GRACE);
                    }
                }
                () = until(deadline), if deadline.is_some() => {
                    let _ = channel.close().await;
                    return Err(Error::Cancelled);
                }
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => io.stdout.write(&data).await,
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            io.stderr.write(&data).await;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                        if got_eof {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        tracing::debug!(host = %self.host, signal = ?signal_name, "remote process killed by signal");
                    }
                    Some(ChannelMsg::Eof) => {
                        got_eof = true;
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                },
            }
        }

        if deadline.is_some() {
            return Err(Error::Cancelled);
        }
        // A channel that closes without an exit status ended abnormally.
        exit_code.ok_or(Error::ChannelClosed)
    }

    /// Open an SFTP subsystem channel.
    pub async fn sftp(&self) -> Result<SftpFs> {
        let channel = self.handle.channel_open_session().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Sftp(format!("subsystem request failed: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Sftp(e.to_string()))?;
        Ok(SftpFs::new(sftp))
    }

    /// Start port forwarding. Remote rules are requested first, while the
    /// session handle is not yet shared with local listeners.
    pub async fn forward(
        &mut self,
        local: &[ForwardRule],
        remote: &[ForwardRule],
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        if !remote.is_empty() {
            let handle = Arc::get_mut(&mut self.handle).ok_or_else(|| {
                Error::Forward("remote forwards must be requested before local ones".to_string())
            })?;
            for rule in remote {
                let bound = handle
                    .tcpip_forward(rule.bind_address.clone(), rule.bind_port as u32)
                    .await
                    .map_err(|e| Error::Forward(format!("{rule}: {e}")))?;
                let port = if bound == 0 { rule.bind_port as u32 } else { bound };
                self.remote_targets.lock().insert(
                    (rule.bind_address.clone(), port),
                    (rule.target_host.clone(), rule.target_port),
                );
                tracing::info!(host = %self.host, rule = %rule, port, "remote forward listening");
            }
        }

        for rule in local {
            let forwarder = forward::start_local(Arc::clone(&self.handle), rule.clone(), cancel.clone()).await?;
            tracing::info!(host = %self.host, rule = %rule, local = %forwarder.local_addr(), "local forward listening");
            self.forwarders.lock().push(forwarder);
        }
        Ok(())
    }

    /// Disconnect the session, then every jump session from the target outward.
    pub async fn disconnect(self) -> Result<()> {
        // Drain to Vec to release lock before await
        let forwarders: Vec<_> = self.forwarders.lock().drain(..).collect();
        for forwarder in forwarders {
            forwarder.stop().await;
        }

        let result = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;

        for jump in self.jumps.iter().rev() {
            if let Err(e) = jump.disconnect(Disconnect::ByApplication, "", "en").await {
                tracing::debug!(host = %self.host, error = %e, "jump disconnect failed");
            }
        }

        result.map_err(Error::Protocol)
    }
}
