// ABOUTME: Progress observation for file transfers.
// ABOUTME: A tee'd reader reports bytes as they flow; observers never touch the data.

use crate::types::HostName;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

pub trait ProgressObserver: Send + Sync {
    fn started(&self, host: &HostName, path: &str, size: u64);
    fn advanced(&self, host: &HostName, path: &str, transferred: u64);
    fn finished(&self, host: &HostName, path: &str, transferred: u64);
}

/// Logs one line per completed file.
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn started(&self, host: &HostName, path: &str, size: u64) {
        tracing::debug!(host = %host, path, size, "transfer started");
    }

    fn advanced(&self, _host: &HostName, _path: &str, _transferred: u64) {}

    fn finished(&self, host: &HostName, path: &str, transferred: u64) {
        tracing::info!(host = %host, path, bytes = transferred, "transfer complete");
    }
}

/// Reader that reports the running byte count to an observer.
pub struct ProgressReader<R> {
    inner: R,
    observer: Arc<dyn ProgressObserver>,
    host: HostName,
    path: String,
    transferred: u64,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, observer: Arc<dyn ProgressObserver>, host: HostName, path: String) -> Self {
        Self {
            inner,
            observer,
            host,
            path,
            transferred: 0,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.transferred += read as u64;
                this.observer
                    .advanced(&this.host, &this.path, this.transferred);
            }
        }
        result
    }
}
