// ABOUTME: Fans one operation out to every selected host and gathers the results.
// ABOUTME: Picks the output mode, stdin wiring and concurrency for the kind of run.

mod barrier;
mod error;
mod operation;
mod result;
mod session;
mod worker;

pub use error::{HostError, Stage};
pub use operation::{ForwardSet, Operation, RunOptions};
pub use result::{AggregateResult, HostOutcome, HostState};
pub use session::{Connector, PtyRequest, RemoteSession, SessionIo, SshConnector, StdinSource};

use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{Error, Result};
use crate::input::InputBroadcaster;
use crate::output::{MultiplexerConfig, OutputMultiplexer, StreamKind, WriteMode};
use crate::terminal::{self, RawModeGuard};
use crate::transfer::{LogProgress, ProgressObserver};
use crate::types::HostName;
use barrier::FanIn;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};
use worker::WorkerContext;

/// The local side of a run.
pub struct LocalIo {
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdin_is_tty: bool,
    /// (columns, rows) when stdout is a terminal.
    pub terminal_size: Option<(u16, u16)>,
    pub resize: Option<mpsc::Receiver<(u16, u16)>>,
}

impl LocalIo {
    pub fn stdio() -> Self {
        let stdin_is_tty = terminal::stdin_is_terminal();
        Self {
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
            stdin: Box::new(tokio::io::stdin()),
            stdin_is_tty,
            terminal_size: terminal::size(),
            resize: None,
        }
    }
}

pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    output: MultiplexerConfig,
    options: RunOptions,
    observer: Arc<dyn ProgressObserver>,
    cancel: watch::Receiver<bool>,
    raw_mode: bool,
}

impl Orchestrator {
    pub fn new(connector: Arc<dyn Connector>, output: MultiplexerConfig, cancel: watch::Receiver<bool>) -> Self {
        Self {
            connector,
            output,
            options: RunOptions::default(),
            observer: Arc::new(LogProgress),
            cancel,
            raw_mode: true,
        }
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Whether an interactive session on a local tty switches it to raw mode.
    pub fn raw_mode(mut self, enabled: bool) -> Self {
        self.raw_mode = enabled;
        self
    }

    /// Run `operation` on every host. Per-host failures end up in the
    /// result; only an unusable selection is an error.
    pub async fn run(&self, hosts: &[HostName], operation: Operation, mut local: LocalIo) -> Result<AggregateResult> {
        if hosts.is_empty() {
            return Err(Error::InvalidConfig("no hosts selected".to_string()));
        }
        if matches!(operation, Operation::Shell) && hosts.len() != 1 {
            return Err(Error::InvalidConfig(format!(
                "an interactive shell needs exactly one host, {} selected",
                hosts.len()
            )));
        }

        let mut diagnostics = Diagnostics::new();
        let single = hosts.len() == 1;
        let interactive = operation.is_interactive(hosts.len());

        let forwards = if single {
            Some(self.options.forwards.clone())
        } else {
            if !self.options.forwards.is_empty() {
                diagnostics.warn(Warning::forward_skipped(format!(
                    "port forwards apply to a single host; ignored for {} hosts",
                    hosts.len()
                )));
            }
            None
        };

        let mut config = self.output.clone();
        config.mode = if interactive { WriteMode::Raw } else { WriteMode::Lines };
        let labels = hosts.iter().map(|h| self.connector.label(h)).collect();
        let mux = OutputMultiplexer::new(local.stdout, local.stderr, labels, config);

        let ctx = WorkerContext {
            connector: Arc::clone(&self.connector),
            forwards,
            observer: Arc::clone(&self.observer),
            per_host_downloads: !single,
            cancel: self.cancel.clone(),
            operation: Arc::new(operation),
        };

        let pty = (interactive && local.stdin_is_tty).then(|| {
            let (cols, rows) = local.terminal_size.unwrap_or(terminal::DEFAULT_SIZE);
            PtyRequest {
                term: self.options.term.clone(),
                cols,
                rows,
            }
        });
        let _raw = match (&pty, self.raw_mode) {
            (Some(_), true) => RawModeGuard::enter()
                .inspect_err(|e| tracing::warn!(error = %e, "could not enable raw mode"))
                .ok(),
            _ => None,
        };

        let session_io = |index: usize, stdin: StdinSource| SessionIo {
            stdout: mux.writer(index, StreamKind::Stdout),
            stderr: mux.writer(index, StreamKind::Stderr),
            stdin,
            pty: None,
            resize: None,
            cancel: self.cancel.clone(),
        };

        let broadcaster = InputBroadcaster::default();
        let mut reader = None;
        let mut fan_in = FanIn::new(hosts);

        match ctx.operation.as_ref() {
            Operation::Transfer(_) => {
                for (index, host) in hosts.iter().enumerate() {
                    let io = session_io(index, StdinSource::Closed);
                    fan_in.spawn(index, worker::run_host(host.clone(), ctx.clone(), io));
                }
            }
            _ if interactive => {
                let (senders, mut receivers) = InputBroadcaster::channels(1);
                reader = Some(tokio::spawn(broadcast(broadcaster, local.stdin, senders, self.cancel.clone())));
                let mut io = session_io(0, receivers.remove(0).into());
                io.resize = local.resize.take().filter(|_| pty.is_some());
                io.pty = pty;
                fan_in.spawn(0, worker::run_host(hosts[0].clone(), ctx.clone(), io));
            }
            _ if self.options.parallel => {
                let (senders, receivers) = InputBroadcaster::channels(hosts.len());
                reader = Some(tokio::spawn(broadcast(broadcaster, local.stdin, senders, self.cancel.clone())));
                for ((index, host), rx) in hosts.iter().enumerate().zip(receivers) {
                    let io = session_io(index, rx.into());
                    fan_in.spawn(index, worker::run_host(host.clone(), ctx.clone(), io));
                }
            }
            _ => {
                // Only piped input is handed along the sequence.
                let shared = if local.stdin_is_tty {
                    None
                } else {
                    let (senders, mut receivers) = InputBroadcaster::channels(1);
                    reader = Some(tokio::spawn(broadcast(broadcaster, local.stdin, senders, self.cancel.clone())));
                    Some(Arc::new(Mutex::new(receivers.remove(0))))
                };
                for (index, host) in hosts.iter().enumerate() {
                    let stdin = match &shared {
                        Some(rx) => StdinSource::Shared(Arc::clone(rx)),
                        None => StdinSource::Closed,
                    };
                    let io = session_io(index, stdin);
                    let outcome = barrier::guarded(host.clone(), worker::run_host(host.clone(), ctx.clone(), io)).await;
                    fan_in.record(index, outcome);
                }
            }
        }

        let outcomes = fan_in.wait().await;

        if let Some(reader) = reader {
            reader.abort();
        }
        if let Err(e) = mux.finish().await {
            tracing::warn!(error = %e, "output flush failed");
        }

        Ok(AggregateResult::new(outcomes, diagnostics))
    }
}

async fn broadcast(
    broadcaster: InputBroadcaster,
    stdin: Box<dyn AsyncRead + Send + Unpin>,
    senders: Vec<mpsc::Sender<Bytes>>,
    cancel: watch::Receiver<bool>,
) {
    if let Err(e) = broadcaster.broadcast(stdin, senders, cancel).await {
        tracing::warn!(error = %e, "reading stdin failed");
    }
}

impl From<mpsc::Receiver<Bytes>> for StdinSource {
    fn from(rx: mpsc::Receiver<Bytes>) -> Self {
        StdinSource::Owned(rx)
    }
}
