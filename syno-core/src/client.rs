use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::auth::{self, Credentials, Session};

const ENTRY_PATH: &str = "/webapi/entry.cgi";
const LIST_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum SynoError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("api returned error code {code}")]
    Api { code: i64 },
    #[error("authentication failed with code {code}")]
    Auth { code: i64 },
    #[error("api response missing data")]
    MissingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Session,
    RateLimit,
    Transient,
    Permanent,
}

impl SynoError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            SynoError::Request(_) => ApiErrorClass::Transient,
            SynoError::Http { status, .. } => classify_http_status(*status),
            SynoError::Api { code } => classify_api_code(*code),
            SynoError::Auth { .. } => ApiErrorClass::Session,
            SynoError::Url(_) | SynoError::Io(_) | SynoError::MissingData => {
                ApiErrorClass::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            ApiErrorClass::Session | ApiErrorClass::RateLimit | ApiErrorClass::Transient
        )
    }
}

fn classify_http_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// 106: session timeout, 107: duplicate login, 119: SID not found.
fn classify_api_code(code: i64) -> ApiErrorClass {
    match code {
        106 | 107 | 119 => ApiErrorClass::Session,
        _ => ApiErrorClass::Permanent,
    }
}

/// Common `{"success": .., "data": .., "error": {"code": ..}}` wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
}

impl<T> Envelope<T> {
    pub(crate) fn check(self) -> Result<Option<T>, SynoError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(SynoError::Api {
                code: self.error.map(|e| e.code).unwrap_or_default(),
            })
        }
    }

    pub(crate) fn into_data(self) -> Result<T, SynoError> {
        self.check()?.ok_or(SynoError::MissingData)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Deserialize)]
struct FileListData {
    #[serde(default)]
    files: Vec<FileItem>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct FileItem {
    name: String,
    path: String,
    #[serde(rename = "isdir")]
    is_dir: bool,
    #[serde(default)]
    additional: Option<FileAdditional>,
}

#[derive(Debug, Deserialize)]
struct FileAdditional {
    #[serde(default)]
    size: u64,
}

impl From<FileItem> for RemoteEntry {
    fn from(item: FileItem) -> Self {
        Self {
            name: item.name,
            path: item.path,
            is_dir: item.is_dir,
            size: item.additional.map(|a| a.size).unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct FileStationClient {
    http: Client,
    base_url: Url,
    session: Session,
}

impl FileStationClient {
    pub async fn login(base_url: &str, credentials: &Credentials) -> Result<Self, SynoError> {
        let http = Client::new();
        let base_url = Url::parse(base_url)?;
        let session = auth::login(&http, &base_url, credentials).await?;
        tracing::debug!(base_url = %base_url, account = %credentials.account, "filestation session opened");
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn with_session(base_url: &str, sid: impl Into<String>) -> Result<Self, SynoError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            session: Session { sid: sid.into() },
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn logout(&self) -> Result<(), SynoError> {
        auth::logout(&self.http, &self.base_url, &self.session).await
    }

    /// Lists every entry directly under `folder_path`, following pagination.
    pub async fn list_directory(&self, folder_path: &str) -> Result<Vec<RemoteEntry>, SynoError> {
        let mut offset = 0u32;
        let mut entries = Vec::new();
        loop {
            let page = self.list_page(folder_path, offset, LIST_PAGE_SIZE).await?;
            let received = page.files.len() as u32;
            offset = offset.saturating_add(received);
            entries.extend(page.files.into_iter().map(RemoteEntry::from));
            if received == 0 || offset >= page.total {
                break;
            }
        }
        Ok(entries)
    }

    async fn list_page(
        &self,
        folder_path: &str,
        offset: u32,
        limit: u32,
    ) -> Result<FileListData, SynoError> {
        let url = self.entry_url(&[
            ("api", "SYNO.FileStation.List"),
            ("version", "1"),
            ("method", "list"),
            ("folder_path", folder_path),
            ("additional", "size"),
            ("offset", &offset.to_string()),
            ("limit", &limit.to_string()),
        ])?;
        let response = self.http.get(url).send().await?;
        let envelope: Envelope<FileListData> = handle_response(response).await?;
        envelope.into_data()
    }

    /// Streams `remote_path` into `destination` through a `.download` partial file.
    ///
    /// When `destination` already holds a file of a different size the download
    /// is kept next to it under a `_N` suffixed name; the returned path says where
    /// the bytes ended up.
    pub async fn download_file(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<DownloadedFile, SynoError> {
        let url = self.entry_url(&[
            ("api", "SYNO.FileStation.Download"),
            ("version", "1"),
            ("method", "download"),
            ("mode", "download"),
            ("path", remote_path),
        ])?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(destination);
        // Failures come back as a 200 with a JSON envelope instead of file bytes.
        let bytes = if is_json(&response) {
            let body = response.bytes().await?;
            if let Ok(envelope) = serde_json::from_slice::<Envelope<serde_json::Value>>(&body) {
                envelope.check()?;
            }
            write_partial(&partial, futures_util::stream::iter([Ok::<_, SynoError>(body)])).await?
        } else {
            write_partial(&partial, response.bytes_stream()).await?
        };

        let target = match tokio::fs::metadata(destination).await {
            Ok(existing) if existing.len() != bytes => unique_path(destination).await?,
            _ => destination.to_path_buf(),
        };
        tokio::fs::rename(&partial, &target).await?;
        Ok(DownloadedFile {
            path: target,
            bytes,
        })
    }

    fn entry_url(&self, params: &[(&str, &str)]) -> Result<Url, SynoError> {
        let mut url = self.base_url.join(ENTRY_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("_sid", &self.session.sid);
        }
        Ok(url)
    }
}

pub(crate) async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, SynoError> {
    if response.status().is_success() {
        Ok(response.json::<T>().await?)
    } else {
        Err(http_error(response).await)
    }
}

async fn http_error(response: reqwest::Response) -> SynoError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SynoError::Http { status, body }
}

fn is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Streams `chunks` into `partial`, removing it again when anything fails.
async fn write_partial<S, B, E>(partial: &Path, chunks: S) -> Result<u64, SynoError>
where
    S: futures_util::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    SynoError: From<E>,
{
    let result = stream_to_file(partial, chunks).await;
    if result.is_err() {
        match tokio::fs::remove_file(partial).await {
            Ok(()) => tracing::debug!(path = %partial.display(), "removed partial download"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %partial.display(), error = %err, "failed to remove partial download");
            }
        }
    }
    result
}

async fn stream_to_file<S, B, E>(partial: &Path, chunks: S) -> Result<u64, SynoError>
where
    S: futures_util::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    SynoError: From<E>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut file = tokio::fs::File::create(partial).await?;
    let mut bytes = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        file.write_all(chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(bytes)
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}download",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

/// First free `<stem>_<n><.ext>` sibling of `path`, counting from 1.
pub async fn unique_path(path: &Path) -> Result<PathBuf, std::io::Error> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    for n in 1..=u32::MAX {
        let candidate = path.with_file_name(format!("{stem}_{n}{ext}"));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name next to {}", path.display()),
    ))
}
