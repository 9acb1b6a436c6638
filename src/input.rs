// ABOUTME: Broadcasts local stdin to every active remote session.
// ABOUTME: Reads in short polls so cancellation is noticed even while stdin is idle.

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-session queue depth; a slow session applies backpressure to the reader.
pub const SESSION_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct InputBroadcaster {
    chunk_size: usize,
    poll_interval: Duration,
}

impl Default for InputBroadcaster {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl InputBroadcaster {
    pub fn new(chunk_size: usize, poll_interval: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            poll_interval,
        }
    }

    /// Create `count` session channels fed by this broadcaster.
    pub fn channels(count: usize) -> (Vec<mpsc::Sender<Bytes>>, Vec<mpsc::Receiver<Bytes>>) {
        (0..count).map(|_| mpsc::channel(SESSION_QUEUE)).unzip()
    }

    /// Copy `reader` to every sender until EOF, cancellation, or every
    /// session has gone away. Dropping the senders signals EOF downstream.
    /// Returns the number of bytes read.
    pub async fn broadcast<R>(
        &self,
        mut reader: R,
        mut sessions: Vec<mpsc::Sender<Bytes>>,
        cancel: watch::Receiver<bool>,
    ) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            if *cancel.borrow() {
                tracing::debug!("stdin broadcast cancelled");
                break;
            }
            if sessions.is_empty() {
                break;
            }

            let n = match tokio::time::timeout(self.poll_interval, reader.read(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
            };
            total += n as u64;

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            let mut open = Vec::with_capacity(sessions.len());
            for tx in sessions {
                if tx.send(chunk.clone()).await.is_ok() {
                    open.push(tx);
                }
            }
            sessions = open;
        }

        tracing::debug!(bytes = total, "stdin closed");
        Ok(total)
    }
}
