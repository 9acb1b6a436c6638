// ABOUTME: Scripted Connector and RemoteSession for orchestrator tests.
// ABOUTME: Each host follows a script; every call lands in a shared event log.

use super::local_fs::LocalDirFs;
use async_trait::async_trait;
use herd::config::ForwardRule;
use herd::orchestrator::{Connector, RemoteSession, SessionIo};
use herd::output::HostLabel;
use herd::ssh::{self, HopStage};
use herd::transfer::RemoteFs;
use herd::types::HostName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::watch;

/// What one scripted host does.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: Vec<&'static str>,
    pub stderr: Vec<&'static str>,
    pub exit_code: u32,
    /// Copy stdin to stdout until EOF before exiting.
    pub echo_stdin: bool,
    pub connect_failure: Option<HopStage>,
    /// Block in exec until the run is cancelled.
    pub hang: bool,
    pub delay: Option<Duration>,
    pub panic: bool,
    pub close_failure: bool,
    pub fs_root: Option<PathBuf>,
}

impl Script {
    pub fn prints(lines: &[&'static str]) -> Self {
        Self {
            stdout: lines.to_vec(),
            ..Self::default()
        }
    }

    pub fn exits(code: u32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(String),
    Forward {
        host: String,
        local: Vec<ForwardRule>,
        remote: Vec<ForwardRule>,
    },
    Exec {
        host: String,
        command: String,
        pty: Option<(String, u16, u16)>,
    },
    Shell(String),
    Filesystem(String),
    Close(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Default)]
pub struct MockConnector {
    scripts: HashMap<String, Script>,
    events: EventLog,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn label(&self, host: &HostName) -> HostLabel {
        HostLabel {
            name: host.clone(),
            addr: format!("{host}.test"),
            user: "tester".to_string(),
            port: 22,
        }
    }

    async fn connect(&self, host: &HostName) -> Result<Box<dyn RemoteSession>, ssh::Error> {
        self.events.lock().push(Event::Connect(host.to_string()));
        let script = self.scripts.get(host.as_str()).cloned().unwrap_or_default();

        if let Some(stage) = script.connect_failure {
            return Err(ssh::Error::Hop {
                hop: host.to_string(),
                stage,
                reason: "scripted failure".to_string(),
            });
        }

        Ok(Box::new(MockSession {
            host: host.to_string(),
            script,
            events: Arc::clone(&self.events),
        }))
    }
}

pub struct MockSession {
    host: String,
    script: Script,
    events: EventLog,
}

impl MockSession {
    async fn perform(&mut self, io: &mut SessionIo) -> Result<u32, ssh::Error> {
        if self.script.panic {
            panic!("scripted panic on {}", self.host);
        }
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }

        for line in &self.script.stdout {
            io.stdout.write(line.as_bytes()).await;
            io.stdout.write(b"\n").await;
        }
        for line in &self.script.stderr {
            io.stderr.write(line.as_bytes()).await;
            io.stderr.write(b"\n").await;
        }

        if self.script.echo_stdin {
            while let Some(chunk) = io.stdin.recv().await {
                io.stdout.write(&chunk).await;
            }
        }

        if self.script.hang {
            let mut cancel = io.cancel.clone();
            while !*cancel.borrow_and_update() {
                if cancel.changed().await.is_err() {
                    break;
                }
            }
            return Err(ssh::Error::Cancelled);
        }

        Ok(self.script.exit_code)
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str, io: &mut SessionIo) -> Result<u32, ssh::Error> {
        self.events.lock().push(Event::Exec {
            host: self.host.clone(),
            command: command.to_string(),
            pty: io.pty.as_ref().map(|p| (p.term.clone(), p.cols, p.rows)),
        });
        self.perform(io).await
    }

    async fn shell(&mut self, io: &mut SessionIo) -> Result<u32, ssh::Error> {
        self.events.lock().push(Event::Shell(self.host.clone()));
        self.perform(io).await
    }

    async fn filesystem(&mut self) -> Result<Arc<dyn RemoteFs>, ssh::Error> {
        self.events.lock().push(Event::Filesystem(self.host.clone()));
        match &self.script.fs_root {
            Some(root) => Ok(Arc::new(LocalDirFs::new(root))),
            None => Err(ssh::Error::Sftp("subsystem unavailable".to_string())),
        }
    }

    async fn forward(
        &mut self,
        local: &[ForwardRule],
        remote: &[ForwardRule],
        _cancel: watch::Receiver<bool>,
    ) -> Result<(), ssh::Error> {
        self.events.lock().push(Event::Forward {
            host: self.host.clone(),
            local: local.to_vec(),
            remote: remote.to_vec(),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ssh::Error> {
        self.events.lock().push(Event::Close(self.host.clone()));
        if self.script.close_failure {
            return Err(ssh::Error::Channel("disconnect refused".to_string()));
        }
        Ok(())
    }
}

/// In-memory sink standing in for the local stdout or stderr.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
