// ABOUTME: Remote filesystem backed by an SFTP subsystem channel.
// ABOUTME: Directory creation tolerates paths that already exist.

use super::{RemoteFs, RemoteMetadata, RemoteReader, RemoteWriter, TransferError};
use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;

fn to_metadata(attrs: &FileAttributes) -> RemoteMetadata {
    RemoteMetadata {
        size: attrs.size.unwrap_or(0),
        mode: attrs.permissions.unwrap_or(0o644) & 0o7777,
        is_dir: attrs.is_dir(),
        is_symlink: attrs.is_symlink(),
    }
}

pub struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

fn remote_error(path: &str, e: impl std::fmt::Display) -> TransferError {
    TransferError::Remote {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn create_dir(&self, path: &str) -> Result<(), TransferError> {
        match self.sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) => match self.sftp.metadata(path).await {
                Ok(attrs) if attrs.is_dir() => Ok(()),
                _ => Err(remote_error(path, e)),
            },
        }
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, TransferError> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(Box::new(file))
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, TransferError> {
        let file = self.sftp.open(path).await.map_err(|e| remote_error(path, e))?;
        Ok(Box::new(file))
    }

    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, TransferError> {
        let attrs = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(to_metadata(&attrs))
    }

    async fn symlink_metadata(&self, path: &str) -> Result<RemoteMetadata, TransferError> {
        let attrs = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(to_metadata(&attrs))
    }

    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), TransferError> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..FileAttributes::default()
        };
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| remote_error(path, e))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<String>, TransferError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| remote_error(path, e))?;
        Ok(entries
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }
}
