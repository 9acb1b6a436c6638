// ABOUTME: SSH TCP port forwarding.
// ABOUTME: Local listeners tunnelled over direct-tcpip, and bridging of server-initiated forwards.

use super::client::SshHandler;
use super::error::{Error, Result};
use crate::config::ForwardRule;
use russh::Channel;
use russh::client::{self, Handle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, watch};

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Handle for a running local forward listener.
pub struct ForwardHandle {
    rule: ForwardRule,
    local_addr: SocketAddr,
    /// Signal to stop the forwarder.
    shutdown: Arc<AtomicBool>,
    /// Notification when shutdown is complete.
    shutdown_complete: Arc<Notify>,
}

impl ForwardHandle {
    pub fn rule(&self) -> &ForwardRule {
        &self.rule
    }

    /// Address the listener actually bound, useful when the rule asked for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        tokio::select! {
            _ = self.shutdown_complete.notified() => {}
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Listen on the rule's bind address and tunnel every accepted connection
/// to its target through the SSH session.
pub(super) async fn start_local(
    handle: Arc<Handle<SshHandler>>,
    rule: ForwardRule,
    cancel: watch::Receiver<bool>,
) -> Result<ForwardHandle> {
    let listener = TcpListener::bind((rule.bind_address.as_str(), rule.bind_port))
        .await
        .map_err(|e| {
            Error::Forward(format!(
                "failed to bind {}:{}: {}",
                rule.bind_address, rule.bind_port, e
            ))
        })?;
    let local_addr = listener.local_addr()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_complete = Arc::new(Notify::new());

    tokio::spawn(run_forwarder(
        listener,
        handle,
        rule.clone(),
        Arc::clone(&shutdown),
        Arc::clone(&shutdown_complete),
        cancel,
    ));

    Ok(ForwardHandle {
        rule,
        local_addr,
        shutdown,
        shutdown_complete,
    })
}

async fn run_forwarder(
    listener: TcpListener,
    handle: Arc<Handle<SshHandler>>,
    rule: ForwardRule,
    shutdown: Arc<AtomicBool>,
    shutdown_complete: Arc<Notify>,
    cancel: watch::Receiver<bool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) || *cancel.borrow() {
            break;
        }

        // Accept with timeout to check shutdown flag periodically
        let accept_result = tokio::select! {
            result = listener.accept() => result,
            _ = tokio::time::sleep(ACCEPT_POLL) => continue,
        };

        match accept_result {
            Ok((stream, peer)) => {
                let handle = Arc::clone(&handle);
                let rule = rule.clone();
                tokio::spawn(async move {
                    if let Err(e) = forward_connection(stream, peer, &handle, &rule).await {
                        tracing::debug!("Forward connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    tracing::warn!(rule = %rule, "Accept error on forward listener: {}", e);
                }
                break;
            }
        }
    }

    shutdown_complete.notify_one();
}

async fn forward_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handle: &Handle<SshHandler>,
    rule: &ForwardRule,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let channel = handle
        .channel_open_direct_tcpip(
            rule.target_host.clone(),
            rule.target_port as u32,
            peer.ip().to_string(),
            peer.port() as u32,
        )
        .await
        .map_err(|e| {
            Error::Forward(format!(
                "failed to open channel to {}:{}: {}",
                rule.target_host, rule.target_port, e
            ))
        })?;

    pump(stream, channel.into_stream()).await
}

/// Connect a server-initiated forwarded channel to its local target.
pub(super) async fn bridge_forwarded(channel: Channel<client::Msg>, host: &str, port: u16) -> Result<()> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::Forward(format!("failed to connect to {host}:{port}: {e}")))?;
    stream.set_nodelay(true)?;
    pump(stream, channel.into_stream()).await
}

async fn pump<S>(mut local: TcpStream, mut remote: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sent, received) = tokio::io::copy_bidirectional(&mut local, &mut remote).await?;
    tracing::debug!(sent, received, "forwarded connection closed");
    Ok(())
}
