use std::path::{Path, PathBuf};

use async_trait::async_trait;
use syno_core::{DownloadedFile, FileStationClient, RemoteEntry, SynoError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("filestation error: {0}")]
    Syno(#[from] SynoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("remote file already exists: {0}")]
    AlreadyExists(String),
    #[error("{path} exists with size {remote}, local file has {local}")]
    Conflict { path: String, local: u64, remote: u64 },
    #[error("no such remote file: {0}")]
    NotFound(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether another attempt at the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Syno(err) => err.is_retryable(),
            SourceError::Other(_) => true,
        }
    }
}

const CONNECTION_LOST_MARKERS: &[&str] = &[
    "connection lost",
    "no connection",
    "no route to host",
    "broken pipe",
    "connection reset",
    "disconnect",
];

impl SinkError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SinkError::ConnectionLost(_))
    }

    /// Classifies an error message coming back from the transport.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();
        if CONNECTION_LOST_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            SinkError::ConnectionLost(message)
        } else if lowered.contains("already exist") {
            SinkError::AlreadyExists(message)
        } else {
            SinkError::Remote(message)
        }
    }
}

/// Where the mirrored tree comes from.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, SourceError>;

    /// Writes `remote_path` at `destination` (or a collision-free sibling of it)
    /// and reports where the bytes landed.
    async fn download_file(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<DownloadedFile, SourceError>;
}

/// Where mirrored files are relayed to.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// `None` when nothing exists at `path`.
    async fn stat_size(&self, path: &str) -> Result<Option<u64>, SinkError>;

    async fn send_file(&self, local: &Path, remote: &str) -> Result<u64, SinkError>;

    async fn remove_file(&self, path: &str) -> Result<(), SinkError>;

    async fn free_space(&self, path: &str) -> Result<u64, SinkError>;
}

#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSink>, SinkError>;
}

#[async_trait]
impl RemoteSource for FileStationClient {
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, SourceError> {
        Ok(FileStationClient::list_directory(self, path).await?)
    }

    async fn download_file(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<DownloadedFile, SourceError> {
        Ok(FileStationClient::download_file(self, remote_path, destination).await?)
    }
}

/// Local path the remote file was actually written to, when it differs from the
/// requested one.
pub fn renamed_to(requested: &Path, downloaded: &DownloadedFile) -> Option<PathBuf> {
    (downloaded.path != requested).then(|| downloaded.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_messages_are_classified() {
        assert!(SinkError::from_message("Connection Lost").is_connection_lost());
        assert!(SinkError::from_message("dial tcp: no route to host").is_connection_lost());
        assert!(SinkError::from_message("write: broken pipe").is_connection_lost());
        assert!(matches!(
            SinkError::from_message("file already exists"),
            SinkError::AlreadyExists(_)
        ));
        assert!(matches!(
            SinkError::from_message("permission denied"),
            SinkError::Remote(_)
        ));
    }

    #[test]
    fn permanent_filestation_errors_are_not_retried() {
        assert!(!SourceError::Syno(SynoError::Api { code: 408 }).is_retryable());
        assert!(SourceError::Syno(SynoError::Api { code: 119 }).is_retryable());
        assert!(SourceError::Other("timed out".into()).is_retryable());
    }

    #[test]
    fn rename_is_reported_only_when_path_changed() {
        let requested = Path::new("/m/a.jpg");
        let same = DownloadedFile {
            path: requested.to_path_buf(),
            bytes: 1,
        };
        let moved = DownloadedFile {
            path: PathBuf::from("/m/a_1.jpg"),
            bytes: 1,
        };
        assert_eq!(renamed_to(requested, &same), None);
        assert_eq!(renamed_to(requested, &moved), Some(PathBuf::from("/m/a_1.jpg")));
    }
}
