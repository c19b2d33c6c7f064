use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh_keys::key;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{OpenFlags, StatusCode};
use tokio::io::AsyncWriteExt;

use crate::sync::remote::{RemoteSink, SinkConnector, SinkError};

/// Client handler that trusts whatever host key the server presents.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens password-authenticated SFTP sessions to one server.
#[derive(Clone)]
pub struct SftpConnector {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl SftpConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    pub async fn open(&self) -> Result<SftpSink, SinkError> {
        tracing::warn!(host = %self.host, port = self.port, "connecting without host key verification");
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (self.host.as_str(), self.port), AcceptAnyHostKey)
            .await
            .map_err(connect_error)?;

        let accepted = handle
            .authenticate_password(self.username.as_str(), self.password.as_str())
            .await
            .map_err(connect_error)?;
        if !accepted {
            return Err(SinkError::Remote(format!(
                "password rejected for {}@{}",
                self.username, self.host
            )));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(connect_error)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(connect_error)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| classify(err, ""))?;

        tracing::info!(host = %self.host, port = self.port, user = %self.username, "sftp session opened");
        Ok(SftpSink {
            sftp,
            _handle: handle,
        })
    }
}

impl std::fmt::Debug for SftpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl SinkConnector for SftpConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSink>, SinkError> {
        Ok(Box::new(self.open().await?))
    }
}

pub struct SftpSink {
    sftp: SftpSession,
    _handle: Handle<AcceptAnyHostKey>,
}

impl SftpSink {
    async fn ensure_parent_dirs(&self, remote: &str) -> Result<(), SinkError> {
        let Some((parent, _)) = remote.rsplit_once('/') else {
            return Ok(());
        };
        let mut current = String::new();
        for part in parent.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            let exists = self
                .sftp
                .try_exists(current.as_str())
                .await
                .map_err(|err| classify(err, &current))?;
            if !exists {
                self.sftp
                    .create_dir(current.as_str())
                    .await
                    .map_err(|err| classify(err, &current))?;
                tracing::debug!(path = %current, "created remote directory");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSink for SftpSink {
    async fn stat_size(&self, path: &str) -> Result<Option<u64>, SinkError> {
        match self.sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(attrs.size.unwrap_or_default())),
            Err(err) => match classify(err, path) {
                SinkError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn send_file(&self, local: &Path, remote: &str) -> Result<u64, SinkError> {
        let mut source = tokio::fs::File::open(local).await?;
        self.ensure_parent_dirs(remote).await?;

        let mut target = match self
            .sftp
            .open_with_flags(
                remote,
                OpenFlags::CREATE | OpenFlags::EXCLUDE | OpenFlags::WRITE,
            )
            .await
        {
            Ok(file) => file,
            Err(err) => {
                let err = classify(err, remote);
                if !err.is_connection_lost() && self.sftp.try_exists(remote).await.unwrap_or(false)
                {
                    return Err(SinkError::AlreadyExists(remote.to_string()));
                }
                return Err(err);
            }
        };

        let bytes = tokio::io::copy(&mut source, &mut target)
            .await
            .map_err(|err| SinkError::from_message(format!("{remote}: {err}")))?;
        target
            .shutdown()
            .await
            .map_err(|err| SinkError::from_message(format!("{remote}: {err}")))?;
        Ok(bytes)
    }

    async fn remove_file(&self, path: &str) -> Result<(), SinkError> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|err| classify(err, path))
    }

    async fn free_space(&self, path: &str) -> Result<u64, SinkError> {
        let stats = self
            .sftp
            .fs_info(path)
            .await
            .map_err(|err| classify(err, path))?
            .ok_or_else(|| SinkError::Remote("server does not report free space".to_string()))?;
        Ok(stats.blocks_avail.saturating_mul(stats.fragment_size))
    }
}

fn connect_error(err: russh::Error) -> SinkError {
    match err {
        russh::Error::Disconnect => SinkError::ConnectionLost("server disconnected".to_string()),
        other => SinkError::from_message(other.to_string()),
    }
}

fn classify(err: SftpError, path: &str) -> SinkError {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => SinkError::NotFound(path.to_string()),
            StatusCode::ConnectionLost | StatusCode::NoConnection => {
                SinkError::ConnectionLost(format!("{path}: {}", status.error_message))
            }
            _ => SinkError::from_message(format!("{path}: {}", status.error_message)),
        },
        SftpError::Timeout => SinkError::ConnectionLost(format!("{path}: timed out")),
        other => SinkError::from_message(format!("{path}: {other}")),
    }
}
