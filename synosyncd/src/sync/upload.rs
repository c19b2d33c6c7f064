use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::admission::AdmissionController;
use super::metadata::{MetadataError, MetadataStore};
use super::paths::{PathError, local_path_for, remote_path_for};
use super::remote::{RemoteSink, SinkError};
use super::session::UploadSession;
use super::state::{TransferEvent, TransferStatus, UploadAction};

const PARTIAL_EXTENSION: &str = "download";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("fail to find {} in metadata", .0.display())]
    MissingMetadata(PathBuf),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("failed to walk local mirror: {0}")]
    Walk(String),
    #[error("filesystem error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("not enough space: need {needed} bytes, {free} free")]
    InsufficientSpace { needed: u64, free: u64 },
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Transferred(u64),
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub local_root: PathBuf,
    /// Remote folder the mirror was pulled from; only that subtree is walked.
    pub source_root: String,
    pub destination_root: String,
    pub spare_space: u64,
    pub delay: Duration,
    pub retry_delay: Duration,
    pub retry_count: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub sent: usize,
    pub already_present: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Walks the local mirror and relays every `NOT_SENT` file to the sink.
pub struct UploadOrchestrator {
    store: MetadataStore,
    admission: AdmissionController,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        store: MetadataStore,
        admission: AdmissionController,
        settings: UploadSettings,
    ) -> Self {
        Self {
            store,
            admission,
            settings,
        }
    }

    pub async fn run(&self, session: &mut UploadSession) -> Result<UploadReport, UploadError> {
        let walk_root = local_path_for(&self.settings.local_root, &self.settings.source_root)?;
        let files = local_files(walk_root).await?;
        let mut report = UploadReport::default();

        for path in files {
            if MetadataStore::is_sidecar(&path) {
                continue;
            }
            let record = match self.store.get(&path).await? {
                Some(record) => record,
                None if path
                    .extension()
                    .is_some_and(|ext| ext == PARTIAL_EXTENSION) =>
                {
                    tracing::warn!(path = %path.display(), "skipping unfinished download");
                    report.skipped += 1;
                    continue;
                }
                None => return Err(UploadError::MissingMetadata(path)),
            };

            match record.status.upload_action() {
                UploadAction::Transfer => self.upload_file(session, &path, &mut report).await?,
                UploadAction::NotDownloaded => {
                    tracing::info!(path = %path.display(), "not downloaded yet, skipping");
                    report.skipped += 1;
                }
                UploadAction::AlreadySent => {
                    tracing::info!(path = %path.display(), "already sent, skipping");
                    report.skipped += 1;
                }
                UploadAction::AlreadyFailed => {
                    tracing::info!(path = %path.display(), "previously failed, skipping");
                    report.skipped += 1;
                }
                UploadAction::Unrecognized(raw) => {
                    tracing::warn!(path = %path.display(), status = %raw, "unknown status, skipping");
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            sent = report.sent,
            already_present = report.already_present,
            failed = report.failed,
            skipped = report.skipped,
            bytes = report.bytes,
            "upload phase finished"
        );
        Ok(report)
    }

    async fn upload_file(
        &self,
        session: &mut UploadSession,
        path: &Path,
        report: &mut UploadReport,
    ) -> Result<(), UploadError> {
        let destination =
            remote_path_for(&self.settings.local_root, &self.settings.destination_root, path)?;
        let local_size = tokio::fs::metadata(path)
            .await
            .map_err(|source| UploadError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let retry_count = self.settings.retry_count.max(1);
        let mut delivery = None;
        for attempt in 1..=retry_count {
            let permit = self.admission.acquire().await;
            let result = self
                .attempt(session.sink(), path, &destination, local_size)
                .await;
            drop(permit);

            match result {
                Ok(done) => {
                    delivery = Some(done);
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        destination = %destination,
                        attempt,
                        retry_count,
                        error = %err,
                        "upload attempt failed"
                    );
                    self.recover(session, &destination, &err).await;
                    if attempt < retry_count && !self.settings.retry_delay.is_zero() {
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        let event = match delivery {
            Some(Delivery::Transferred(bytes)) => {
                report.sent += 1;
                report.bytes += bytes;
                tracing::info!(path = %path.display(), destination = %destination, bytes, "sent");
                TransferEvent::Uploaded
            }
            Some(Delivery::AlreadyPresent) => {
                report.sent += 1;
                report.already_present += 1;
                tracing::info!(
                    path = %path.display(),
                    destination = %destination,
                    "same-size file already at destination"
                );
                TransferEvent::Uploaded
            }
            None => {
                report.failed += 1;
                tracing::error!(
                    path = %path.display(),
                    destination = %destination,
                    retry_count,
                    "upload retries exhausted"
                );
                TransferEvent::UploadExhausted
            }
        };
        let status = TransferStatus::NotSent
            .next(event)
            .unwrap_or(TransferStatus::Failed);
        self.store.write(path, 0, status.clone()).await?;
        tracing::info!(path = %path.display(), status = %status, "record updated");

        if !self.settings.delay.is_zero() {
            tokio::time::sleep(self.settings.delay).await;
        }
        Ok(())
    }

    async fn attempt(
        &self,
        sink: &dyn RemoteSink,
        path: &Path,
        destination: &str,
        local_size: u64,
    ) -> Result<Delivery, AttemptError> {
        let free = sink.free_space(&self.settings.destination_root).await?;
        let needed = local_size.saturating_add(self.settings.spare_space);
        if needed > free {
            return Err(AttemptError::InsufficientSpace { needed, free });
        }

        match sink.stat_size(destination).await? {
            Some(remote) if remote == local_size => return Ok(Delivery::AlreadyPresent),
            Some(remote) => {
                return Err(SinkError::Conflict {
                    path: destination.to_string(),
                    local: local_size,
                    remote,
                }
                .into());
            }
            None => {}
        }

        let bytes = sink.send_file(path, destination).await?;
        Ok(Delivery::Transferred(bytes))
    }

    /// Gets the session ready for the next attempt after `err`.
    async fn recover(&self, session: &mut UploadSession, destination: &str, err: &AttemptError) {
        match err {
            AttemptError::InsufficientSpace { .. } => {}
            AttemptError::Sink(sink_err) if sink_err.is_connection_lost() => {
                if let Err(err) = session.reconnect().await {
                    tracing::warn!(error = %err, "failed to re-establish upload session");
                }
            }
            AttemptError::Sink(_) => match session.sink().remove_file(destination).await {
                Ok(()) => {
                    tracing::info!(destination = %destination, "removed leftover destination file");
                }
                Err(SinkError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(destination = %destination, error = %err, "failed to remove destination file");
                }
            },
        }
    }
}

/// Regular files under `root` in name order. A missing root has no files.
async fn local_files(root: PathBuf) -> Result<Vec<PathBuf>, UploadError> {
    if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
        tracing::warn!(path = %root.display(), "local mirror does not exist yet");
        return Ok(Vec::new());
    }
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|err| UploadError::Walk(err.to_string()))?
    .map_err(|err| UploadError::Walk(err.to_string()))
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
