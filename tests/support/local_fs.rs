// ABOUTME: RemoteFs backed by a local directory, standing in for an SFTP server.
// ABOUTME: Remote paths are resolved beneath the root, absolute or not.

use async_trait::async_trait;
use herd::transfer::{RemoteFs, RemoteMetadata, RemoteReader, RemoteWriter, TransferError};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub struct LocalDirFs {
    root: PathBuf,
}

impl LocalDirFs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn remote_error(path: &str, e: std::io::Error) -> TransferError {
    TransferError::Remote {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl RemoteFs for LocalDirFs {
    async fn create_dir(&self, path: &str) -> Result<(), TransferError> {
        let local = self.resolve(path);
        match tokio::fs::create_dir(&local).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && local.is_dir() => Ok(()),
            Err(e) => Err(remote_error(path, e)),
        }
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, TransferError> {
        let file = tokio::fs::File::create(self.resolve(path))
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(Box::new(file))
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, TransferError> {
        let file = tokio::fs::File::open(self.resolve(path))
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(Box::new(file))
    }

    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, TransferError> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(RemoteMetadata {
            size: meta.len(),
            mode: meta.permissions().mode(),
            is_dir: meta.is_dir(),
            is_symlink: false,
        })
    }

    async fn symlink_metadata(&self, path: &str) -> Result<RemoteMetadata, TransferError> {
        let meta = tokio::fs::symlink_metadata(self.resolve(path))
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(RemoteMetadata {
            size: meta.len(),
            mode: meta.permissions().mode(),
            is_dir: meta.is_dir(),
            is_symlink: meta.file_type().is_symlink(),
        })
    }

    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), TransferError> {
        tokio::fs::set_permissions(self.resolve(path), std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| remote_error(path, e))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<String>, TransferError> {
        let mut entries = tokio::fs::read_dir(self.resolve(path))
            .await
            .map_err(|e| remote_error(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| remote_error(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
