// ABOUTME: Merges per-host stdout/stderr into labelled, line-buffered terminal output.
// ABOUTME: One consumer task drains every host writer, so lines never interleave mid-line.

use crate::types::HostName;
use bytes::Bytes;
use crossterm::style::{Color, Stylize};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 1024;

/// A partial line is emitted on its own once it reaches this size.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const PALETTE: [Color; 6] = [
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// How host writers hand bytes to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Hold partial lines until a newline or close.
    Lines,
    /// Forward chunks untouched, for a single attached terminal session.
    Raw,
}

/// Values substituted into the prompt template for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLabel {
    pub name: HostName,
    pub addr: String,
    pub user: String,
    pub port: u16,
}

/// Observer of every byte written by any host, for session logging.
pub trait OutputTap: Send + Sync {
    fn observe(&self, host: &HostName, stream: StreamKind, bytes: &[u8]);
}

#[derive(Clone)]
pub struct MultiplexerConfig {
    pub prompt: String,
    pub color: bool,
    pub mode: WriteMode,
    pub tap: Option<Arc<dyn OutputTap>>,
}

impl MultiplexerConfig {
    pub fn new(prompt: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            prompt: prompt.into(),
            color: false,
            mode,
            tap: None,
        }
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn tap(mut self, tap: Arc<dyn OutputTap>) -> Self {
        self.tap = Some(tap);
        self
    }
}

/// A unit of host output: one complete line in line mode, one chunk in raw mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub host: usize,
    pub stream: StreamKind,
    /// 1-based, per host and stream.
    pub seq: u64,
    pub payload: Bytes,
}

enum Event {
    Frame(OutputFrame),
    Close(oneshot::Sender<()>),
}

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

pub struct OutputMultiplexer {
    tx: mpsc::Sender<Event>,
    mode: WriteMode,
    task: JoinHandle<io::Result<()>>,
}

impl OutputMultiplexer {
    pub fn new<O, E>(stdout: O, stderr: E, labels: Vec<HostLabel>, config: MultiplexerConfig) -> Self
    where
        O: AsyncWrite + Send + Unpin + 'static,
        E: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mode = config.mode;
        let consumer = Consumer {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            prefixed: labels.len() > 1 && mode == WriteMode::Lines,
            labels,
            config,
        };
        let task = tokio::spawn(consumer.run(rx));
        Self { tx, mode, task }
    }

    pub fn stdio(labels: Vec<HostLabel>, config: MultiplexerConfig) -> Self {
        Self::new(tokio::io::stdout(), tokio::io::stderr(), labels, config)
    }

    pub fn writer(&self, host: usize, stream: StreamKind) -> HostWriter {
        HostWriter {
            host,
            stream,
            mode: self.mode,
            tx: self.tx.clone(),
            pending: Vec::new(),
            seq: 0,
        }
    }

    /// Wait until every writer is gone and all output is flushed.
    pub async fn finish(self) -> io::Result<()> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| io::Error::other(format!("output task failed: {e}")))?
    }
}

/// Write half handed to one host's stream.
pub struct HostWriter {
    host: usize,
    stream: StreamKind,
    mode: WriteMode,
    tx: mpsc::Sender<Event>,
    pending: Vec<u8>,
    seq: u64,
}

impl HostWriter {
    pub fn host(&self) -> usize {
        self.host
    }

    pub async fn write(&mut self, data: &[u8]) {
        match self.mode {
            WriteMode::Raw => self.send(Bytes::copy_from_slice(data)).await,
            WriteMode::Lines => {
                self.pending.extend_from_slice(data);
                while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=pos).collect();
                    self.send(Bytes::from(line)).await;
                }
                if self.pending.len() >= MAX_LINE_BYTES {
                    let long = std::mem::take(&mut self.pending);
                    self.send(Bytes::from(long)).await;
                }
            }
        }
    }

    /// Flush any partial line and wait until the consumer has written
    /// everything this writer sent.
    pub async fn close(mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.send(Bytes::from(rest)).await;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Event::Close(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    async fn send(&mut self, payload: Bytes) {
        self.seq += 1;
        let frame = OutputFrame {
            host: self.host,
            stream: self.stream,
            seq: self.seq,
            payload,
        };
        // A closed consumer has already reported its own error.
        let _ = self.tx.send(Event::Frame(frame)).await;
    }
}

struct Consumer {
    stdout: Sink,
    stderr: Sink,
    labels: Vec<HostLabel>,
    config: MultiplexerConfig,
    prefixed: bool,
}

impl Consumer {
    async fn run(mut self, mut rx: mpsc::Receiver<Event>) -> io::Result<()> {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Frame(frame) => {
                    if let Err(e) = self.write_frame(&frame).await {
                        tracing::warn!("output write failed: {}", e);
                        return Err(e);
                    }
                }
                Event::Close(ack) => {
                    self.stdout.flush().await?;
                    self.stderr.flush().await?;
                    let _ = ack.send(());
                }
            }
        }

        self.stdout.flush().await?;
        self.stderr.flush().await
    }

    async fn write_frame(&mut self, frame: &OutputFrame) -> io::Result<()> {
        let label = self.labels.get(frame.host);

        if let (Some(tap), Some(label)) = (&self.config.tap, label) {
            tap.observe(&label.name, frame.stream, &frame.payload);
        }

        let prefix = match (self.prefixed, label) {
            (true, Some(label)) => Some(self.render_prefix(frame.host, label, frame.seq)),
            _ => None,
        };

        let sink = match frame.stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };

        if let Some(prefix) = prefix {
            sink.write_all(prefix.as_bytes()).await?;
            sink.write_all(&frame.payload).await?;
            if !frame.payload.ends_with(b"\n") {
                sink.write_all(b"\n").await?;
            }
        } else {
            sink.write_all(&frame.payload).await?;
        }
        sink.flush().await
    }

    fn render_prefix(&self, index: usize, label: &HostLabel, seq: u64) -> String {
        let text = render_template(&self.config.prompt, label, seq);
        if self.config.color {
            text.with(host_color(index)).to_string()
        } else {
            text
        }
    }
}

/// Deterministic display colour for the host at `index` in the selection.
pub fn host_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

/// Substitute `${SERVER} ${ADDR} ${USER} ${PORT} ${COUNT}` in a prompt template.
pub fn render_template(template: &str, label: &HostLabel, count: u64) -> String {
    template
        .replace("${SERVER}", label.name.as_str())
        .replace("${ADDR}", &label.addr)
        .replace("${USER}", &label.user)
        .replace("${PORT}", &label.port.to_string())
        .replace("${COUNT}", &count.to_string())
}
