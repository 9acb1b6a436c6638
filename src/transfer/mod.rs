// ABOUTME: File transfer between the local machine and one remote host.
// ABOUTME: Recursive put/get over a RemoteFs, with per-path results and optional mode preservation.

mod progress;
mod sftp;

pub use progress::{LogProgress, ProgressObserver, ProgressReader};
pub use sftp::SftpFs;

use crate::types::HostName;
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Permission bits carried over when preserving modes (rwx plus setuid/setgid/sticky).
pub const MODE_MASK: u32 = 0o7777;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote {path}: {reason}")]
    Remote { path: String, reason: String },

    #[error("local {path}: {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    fn local(path: &Path, source: std::io::Error) -> Self {
        TransferError::Local {
            path: path.display().to_string(),
            source,
        }
    }

    fn remote(path: &str, e: impl std::fmt::Display) -> Self {
        TransferError::Remote {
            path: path.to_string(),
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// What to copy. Uploads take local sources and a remote destination;
/// downloads take remote sources and a local destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub direction: Direction,
    pub sources: Vec<String>,
    pub destination: String,
    pub preserve: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Remote file operations needed by transfers.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Create a directory. An existing directory at `path` is not an error.
    async fn create_dir(&self, path: &str) -> Result<(), TransferError>;
    async fn create(&self, path: &str) -> Result<RemoteWriter, TransferError>;
    async fn open(&self, path: &str) -> Result<RemoteReader, TransferError>;
    /// Metadata of the file a link points at.
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, TransferError>;
    /// Metadata of the path itself, without following a final link.
    async fn symlink_metadata(&self, path: &str) -> Result<RemoteMetadata, TransferError>;
    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), TransferError>;
    /// Entry names, excluding `.` and `..`.
    async fn read_dir(&self, path: &str) -> Result<Vec<String>, TransferError>;
}

#[derive(Debug)]
pub struct PathOutcome {
    pub path: String,
    pub result: Result<u64, TransferError>,
}

/// Per-path results of one host's transfer.
#[derive(Debug, Default)]
pub struct TransferReport {
    pub entries: Vec<PathOutcome>,
}

impl TransferReport {
    fn record(&mut self, path: impl Into<String>, result: Result<u64, TransferError>) {
        let path = path.into();
        if let Err(e) = &result {
            tracing::warn!(path = %path, error = %e, "transfer failed");
        }
        self.entries.push(PathOutcome { path, result });
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_err()).count()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok())
            .sum()
    }
}

pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Create every component of `path`, tolerating ones that already exist.
async fn ensure_remote_dir(fs: &dyn RemoteFs, path: &str) -> Result<(), TransferError> {
    let mut current = if path.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = join_remote(&current, part);
        fs.create_dir(&current).await?;
    }
    Ok(())
}

pub struct Transfer<'a> {
    pub fs: &'a dyn RemoteFs,
    pub host: &'a HostName,
    pub observer: Arc<dyn ProgressObserver>,
}

impl Transfer<'_> {
    /// Upload local sources to the remote destination. The destination is a
    /// directory when it ends with `/`, already is one, or several sources are given.
    pub async fn put(&self, plan: &TransferPlan) -> TransferReport {
        let mut report = TransferReport::default();
        let destination = plan.destination.as_str();

        let into_dir = destination.ends_with('/')
            || plan.sources.len() > 1
            || matches!(self.fs.metadata(destination).await, Ok(m) if m.is_dir);

        if into_dir && let Err(e) = ensure_remote_dir(self.fs, destination).await {
            report.record(destination, Err(e));
            return report;
        }

        for source in &plan.sources {
            let local = PathBuf::from(source);
            let remote = match (into_dir, local.file_name()) {
                (true, Some(name)) => join_remote(destination, &name.to_string_lossy()),
                (true, None) => {
                    report.record(source.as_str(), Err(TransferError::local(
                        &local,
                        std::io::Error::other("source has no file name"),
                    )));
                    continue;
                }
                (false, _) => destination.trim_end_matches('/').to_string(),
            };
            self.put_tree(local, remote, plan.preserve, &mut report).await;
        }

        report
    }

    async fn put_tree(&self, local: PathBuf, remote: String, preserve: bool, report: &mut TransferReport) {
        // Named sources are followed; links found while walking are skipped.
        let mut stack = vec![(local, remote, true)];

        while let Some((local, remote, named)) = stack.pop() {
            let meta = if named {
                tokio::fs::metadata(&local).await
            } else {
                tokio::fs::symlink_metadata(&local).await
            };
            let meta = match meta {
                Ok(meta) => meta,
                Err(e) => {
                    report.record(remote, Err(TransferError::local(&local, e)));
                    continue;
                }
            };
            if meta.file_type().is_symlink() {
                tracing::warn!(host = %self.host, path = %local.display(), "skipping symbolic link");
                continue;
            }
            let mode = meta.permissions().mode() & MODE_MASK;

            if !meta.is_dir() {
                let result = self.put_file(&local, &remote, meta.len(), preserve.then_some(mode)).await;
                report.record(remote, result);
                continue;
            }

            if let Err(e) = self.fs.create_dir(&remote).await {
                report.record(remote, Err(e));
                continue;
            }
            if preserve && let Err(e) = self.fs.set_mode(&remote, mode).await {
                report.record(remote.as_str(), Err(e));
            }

            let mut entries = match tokio::fs::read_dir(&local).await {
                Ok(entries) => entries,
                Err(e) => {
                    report.record(remote, Err(TransferError::local(&local, e)));
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        stack.push((entry.path(), join_remote(&remote, &name), false));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        report.record(remote.as_str(), Err(TransferError::local(&local, e)));
                        break;
                    }
                }
            }
        }
    }

    async fn put_file(
        &self,
        local: &Path,
        remote: &str,
        size: u64,
        mode: Option<u32>,
    ) -> Result<u64, TransferError> {
        self.observer.started(self.host, remote, size);

        let file = tokio::fs::File::open(local)
            .await
            .map_err(|e| TransferError::local(local, e))?;
        let mut reader = ProgressReader::new(
            file,
            Arc::clone(&self.observer),
            self.host.clone(),
            remote.to_string(),
        );

        let mut writer = self.fs.create(remote).await?;
        let bytes = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| TransferError::remote(remote, e))?;
        writer
            .shutdown()
            .await
            .map_err(|e| TransferError::remote(remote, e))?;

        if let Some(mode) = mode {
            self.fs.set_mode(remote, mode).await?;
        }

        self.observer.finished(self.host, remote, bytes);
        Ok(bytes)
    }

    /// Download remote sources into the local directory `destination`.
    pub async fn get(&self, plan: &TransferPlan, destination: &Path) -> TransferReport {
        let mut report = TransferReport::default();

        if let Err(e) = tokio::fs::create_dir_all(destination).await {
            report.record(
                destination.display().to_string(),
                Err(TransferError::local(destination, e)),
            );
            return report;
        }

        for source in &plan.sources {
            let local = destination.join(remote_basename(source));
            self.get_tree(source.clone(), local, plan.preserve, &mut report)
                .await;
        }

        report
    }

    async fn get_tree(&self, remote: String, local: PathBuf, preserve: bool, report: &mut TransferReport) {
        let mut stack = vec![(remote, local, true)];

        while let Some((remote, local, named)) = stack.pop() {
            let meta = if named {
                self.fs.metadata(&remote).await
            } else {
                self.fs.symlink_metadata(&remote).await
            };
            let meta = match meta {
                Ok(meta) => meta,
                Err(e) => {
                    report.record(remote, Err(e));
                    continue;
                }
            };
            if meta.is_symlink {
                tracing::warn!(host = %self.host, path = %remote, "skipping symbolic link");
                continue;
            }

            if !meta.is_dir {
                let result = self.get_file(&remote, &local, meta, preserve).await;
                report.record(remote, result);
                continue;
            }

            if let Err(e) = tokio::fs::create_dir_all(&local).await {
                report.record(remote, Err(TransferError::local(&local, e)));
                continue;
            }
            if preserve {
                let perms = std::fs::Permissions::from_mode(meta.mode & MODE_MASK);
                if let Err(e) = tokio::fs::set_permissions(&local, perms).await {
                    report.record(remote.as_str(), Err(TransferError::local(&local, e)));
                }
            }

            match self.fs.read_dir(&remote).await {
                Ok(names) => {
                    for name in names {
                        stack.push((join_remote(&remote, &name), local.join(&name), false));
                    }
                }
                Err(e) => report.record(remote, Err(e)),
            }
        }
    }

    async fn get_file(
        &self,
        remote: &str,
        local: &Path,
        meta: RemoteMetadata,
        preserve: bool,
    ) -> Result<u64, TransferError> {
        self.observer.started(self.host, remote, meta.size);

        let source = self.fs.open(remote).await?;
        let mut reader = ProgressReader::new(
            source,
            Arc::clone(&self.observer),
            self.host.clone(),
            remote.to_string(),
        );

        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| TransferError::local(local, e))?;
        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| TransferError::remote(remote, e))?;
        file.flush().await.map_err(|e| TransferError::local(local, e))?;

        if preserve {
            let perms = std::fs::Permissions::from_mode(meta.mode & MODE_MASK);
            tokio::fs::set_permissions(local, perms)
                .await
                .map_err(|e| TransferError::local(local, e))?;
        }

        self.observer.finished(self.host, remote, bytes);
        Ok(bytes)
    }
}
