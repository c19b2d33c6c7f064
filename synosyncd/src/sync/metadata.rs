use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::state::TransferStatus;

pub const SIDECAR_NAME: &str = "metadata.json";
const SIDECAR_TMP_NAME: &str = "metadata.json.tmp";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no metadata sidecar in {0}")]
    NotFound(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed metadata sidecar {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("path has no parent directory: {0}")]
    NoParent(PathBuf),
    #[error("metadata scan failed: {0}")]
    Walk(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub status: TransferStatus,
}

/// Records of one directory, keyed by absolute file path.
pub type MetadataMap = BTreeMap<PathBuf, FileMetadata>;

/// Per-directory JSON sidecars holding the transfer state of the files next to them.
///
/// Writes are read-modify-write of the whole sidecar under one store-wide lock
/// and are flushed to disk before returning. Clones share the lock.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    write_lock: Arc<Mutex<()>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sidecar_path(dir: &Path) -> PathBuf {
        dir.join(SIDECAR_NAME)
    }

    /// True for the sidecar itself and its in-progress replacement.
    pub fn is_sidecar(path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name == SIDECAR_NAME || name == SIDECAR_TMP_NAME)
    }

    pub async fn read(&self, dir: &Path) -> Result<MetadataMap, MetadataError> {
        let sidecar = Self::sidecar_path(dir);
        let data = match tokio::fs::read(&sidecar).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MetadataError::NotFound(dir.to_path_buf()));
            }
            Err(source) => {
                return Err(MetadataError::Io {
                    path: sidecar,
                    source,
                });
            }
        };
        parse_sidecar(&sidecar, &data)
    }

    /// Like [`read`](Self::read) but a missing sidecar is an empty record set.
    pub async fn read_or_empty(&self, dir: &Path) -> Result<MetadataMap, MetadataError> {
        match self.read(dir).await {
            Err(MetadataError::NotFound(_)) => Ok(MetadataMap::new()),
            other => other,
        }
    }

    pub async fn get(&self, path: &Path) -> Result<Option<FileMetadata>, MetadataError> {
        let dir = parent_of(path)?;
        Ok(self.read_or_empty(dir).await?.remove(path))
    }

    /// Stores `status` for `path`. For any status other than `INIT` the size
    /// already on record is kept (0 when there is none) and `size` is ignored.
    pub async fn write(
        &self,
        path: &Path,
        size: u64,
        status: TransferStatus,
    ) -> Result<(), MetadataError> {
        let dir = parent_of(path)?;
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_or_empty(dir).await?;
        let size = if status == TransferStatus::Init {
            size
        } else {
            records.get(path).map(|m| m.size).unwrap_or_default()
        };
        records.insert(path.to_path_buf(), FileMetadata { size, status });

        let sidecar = Self::sidecar_path(dir);
        let encoded =
            serde_json::to_vec_pretty(&records).map_err(|source| MetadataError::Parse {
                path: sidecar.clone(),
                source,
            })?;
        persist(&sidecar, &dir.join(SIDECAR_TMP_NAME), &encoded).await
    }

    /// Every record under `root` (recursively) whose status equals `status`.
    pub async fn scan(
        &self,
        root: &Path,
        status: &TransferStatus,
    ) -> Result<MetadataMap, MetadataError> {
        let root = root.to_path_buf();
        let dirs = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) if entry.file_type().is_dir() => Some(Ok(entry.into_path())),
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|err| MetadataError::Walk(err.to_string()))?
        .map_err(|err| MetadataError::Walk(err.to_string()))?;

        let mut matches = MetadataMap::new();
        for dir in dirs {
            for (path, record) in self.read_or_empty(&dir).await? {
                if &record.status == status {
                    matches.insert(path, record);
                }
            }
        }
        Ok(matches)
    }
}

fn parent_of(path: &Path) -> Result<&Path, MetadataError> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| MetadataError::NoParent(path.to_path_buf()))
}

fn parse_sidecar(sidecar: &Path, data: &[u8]) -> Result<MetadataMap, MetadataError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(MetadataMap::new());
    }
    serde_json::from_slice(data).map_err(|source| MetadataError::Parse {
        path: sidecar.to_path_buf(),
        source,
    })
}

async fn persist(sidecar: &Path, tmp: &Path, data: &[u8]) -> Result<(), MetadataError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| MetadataError::Io { path, source }
    };
    let mut file = tokio::fs::File::create(tmp).await.map_err(io_err(tmp))?;
    file.write_all(data).await.map_err(io_err(tmp))?;
    file.sync_all().await.map_err(io_err(tmp))?;
    drop(file);
    tokio::fs::rename(tmp, sidecar)
        .await
        .map_err(io_err(sidecar))
}
