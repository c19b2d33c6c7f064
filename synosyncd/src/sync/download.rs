use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

use super::admission::AdmissionController;
use super::backoff::Backoff;
use super::metadata::{MetadataError, MetadataStore};
use super::paths::{PathError, local_path_for};
use super::remote::{RemoteSource, SourceError, renamed_to};
use super::state::{Reconcile, TransferEvent, TransferStatus, reconcile};
use super::tree::{NodeId, RemoteNode, RemoteTree};

pub const RECYCLE_DIR: &str = "#recycle";
const MIB: u64 = 1024 * 1024;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to list {path}: {source}")]
    Listing {
        path: String,
        #[source]
        source: SourceError,
    },
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("filesystem error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub remote_root: String,
    pub local_root: PathBuf,
    pub delay: Duration,
    pub retry_delay: Duration,
    pub retry_count: u32,
    pub progress_interval: Duration,
    pub listing_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub discovered: usize,
    pub reset: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub failures: Vec<(PathBuf, String)>,
}

enum FileOutcome {
    Downloaded,
    Skipped,
    Failed(PathBuf, String),
}

/// Mirrors the remote tree under the local root and pulls every file still in `INIT`.
pub struct DownloadOrchestrator<S> {
    source: Arc<S>,
    store: MetadataStore,
    admission: AdmissionController,
    settings: DownloadSettings,
    bytes: Arc<AtomicU64>,
}

impl<S> DownloadOrchestrator<S>
where
    S: RemoteSource + 'static,
{
    pub fn new(
        source: Arc<S>,
        store: MetadataStore,
        admission: AdmissionController,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            source,
            store,
            admission,
            settings,
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run(&self) -> Result<DownloadReport, DownloadError> {
        let mut report = DownloadReport::default();
        let tree = self.reconcile(&mut report).await?;
        tracing::info!(
            entries = tree.len(),
            files = report.discovered,
            reset = report.reset,
            "remote tree reconciled"
        );

        if let Some(listing_path) = &self.settings.listing_path {
            if let Err(err) = tokio::fs::write(listing_path, tree.render_listing()).await {
                tracing::warn!(path = %listing_path.display(), error = %err, "failed to write file listing");
            }
        }

        self.transfer(&tree, &mut report).await?;
        tracing::info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failures.len(),
            mib = report.bytes / MIB,
            "download phase finished"
        );
        Ok(report)
    }

    /// Creates the local directory skeleton and brings every file's record in
    /// line with the listing. Performs no transfers.
    pub async fn reconcile(&self, report: &mut DownloadReport) -> Result<RemoteTree, DownloadError> {
        let root_dir = local_path_for(&self.settings.local_root, &self.settings.remote_root)?;
        create_dir(&root_dir).await?;

        let mut tree = RemoteTree::default();
        let roots = self
            .reconcile_dir(&self.settings.remote_root, &root_dir, &mut tree, report)
            .await?;
        tree.set_roots(roots);
        Ok(tree)
    }

    fn reconcile_dir<'a>(
        &'a self,
        remote_dir: &'a str,
        local_dir: &'a Path,
        tree: &'a mut RemoteTree,
        report: &'a mut DownloadReport,
    ) -> BoxFuture<'a, Result<Vec<NodeId>, DownloadError>> {
        Box::pin(async move {
            let entries = self
                .source
                .list_directory(remote_dir)
                .await
                .map_err(|source| DownloadError::Listing {
                    path: remote_dir.to_string(),
                    source,
                })?;
            let records = self.store.read_or_empty(local_dir).await?;

            let mut ids = Vec::with_capacity(entries.len());
            for entry in entries {
                let local_path = local_path_for(&self.settings.local_root, &entry.path)?;

                if entry.is_dir {
                    if entry.name == RECYCLE_DIR {
                        tracing::debug!(path = %entry.path, "skipping recycle bin");
                        continue;
                    }
                    create_dir(&local_path).await?;
                    let children = self
                        .reconcile_dir(&entry.path, &local_path, tree, report)
                        .await?;
                    ids.push(tree.push(RemoteNode {
                        name: entry.name,
                        remote_path: entry.path,
                        local_path,
                        is_dir: true,
                        size: 0,
                        children,
                    }));
                    continue;
                }

                if MetadataStore::is_sidecar(&local_path) {
                    tracing::warn!(
                        path = %entry.path,
                        "remote file collides with the metadata sidecar, skipping"
                    );
                    continue;
                }

                report.discovered += 1;
                let stored = records.get(&local_path);
                match reconcile(stored.map(|r| r.size), entry.size) {
                    Reconcile::Keep => {
                        tracing::debug!(path = %local_path.display(), "record unchanged");
                    }
                    Reconcile::Reset => {
                        self.store
                            .write(&local_path, entry.size, TransferStatus::Init)
                            .await?;
                        remove_stale(&local_path).await?;
                        report.reset += 1;
                        tracing::info!(
                            path = %local_path.display(),
                            size = entry.size,
                            previous = ?stored.map(|r| r.status.as_str()),
                            "record set to INIT"
                        );
                    }
                }

                ids.push(tree.push(RemoteNode {
                    name: entry.name,
                    remote_path: entry.path,
                    local_path,
                    is_dir: false,
                    size: entry.size,
                    children: Vec::new(),
                }));
            }
            Ok(ids)
        })
    }

    /// Downloads every file of `tree` whose record is still `INIT`, at most
    /// `workers` at a time, and waits for all of them.
    pub async fn transfer(
        &self,
        tree: &RemoteTree,
        report: &mut DownloadReport,
    ) -> Result<(), DownloadError> {
        let progress = self.spawn_progress();
        let start = self.bytes.load(Ordering::Relaxed);

        let mut tasks = JoinSet::new();
        for id in tree.files() {
            let node = tree.node(id);
            let permit = self.admission.acquire().await;
            let job = DownloadJob {
                source: Arc::clone(&self.source),
                store: self.store.clone(),
                bytes: Arc::clone(&self.bytes),
                remote_path: node.remote_path.clone(),
                local_path: node.local_path.clone(),
                delay: self.settings.delay,
                retry_count: self.settings.retry_count.max(1),
                backoff: Backoff::from_retry_delay(self.settings.retry_delay),
            };
            tasks.spawn(async move {
                let outcome = job.run().await;
                drop(permit);
                outcome
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(FileOutcome::Downloaded)) => report.downloaded += 1,
                Ok(Ok(FileOutcome::Skipped)) => report.skipped += 1,
                Ok(Ok(FileOutcome::Failed(path, error))) => report.failures.push((path, error)),
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "download task aborted");
                    first_error.get_or_insert(err);
                }
                Err(err) => {
                    first_error.get_or_insert(DownloadError::Task(err.to_string()));
                }
            }
        }
        progress.abort();

        report.bytes = self.bytes.load(Ordering::Relaxed).saturating_sub(start);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_progress(&self) -> tokio::task::JoinHandle<()> {
        let bytes = Arc::clone(&self.bytes);
        let every = self.settings.progress_interval.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::info!(mib = bytes.load(Ordering::Relaxed) / MIB, "download progress");
            }
        })
    }
}

struct DownloadJob<S> {
    source: Arc<S>,
    store: MetadataStore,
    bytes: Arc<AtomicU64>,
    remote_path: String,
    local_path: PathBuf,
    delay: Duration,
    retry_count: u32,
    backoff: Backoff,
}

impl<S: RemoteSource> DownloadJob<S> {
    async fn run(self) -> Result<FileOutcome, DownloadError> {
        // Another pass may have moved the record on since dispatch was decided.
        if let Some(record) = self.store.get(&self.local_path).await?
            && record.status != TransferStatus::Init
        {
            tracing::info!(
                path = %self.local_path.display(),
                status = %record.status,
                "already downloaded, skipping"
            );
            return Ok(FileOutcome::Skipped);
        }

        let mut attempt = 0;
        let downloaded = loop {
            match self
                .source
                .download_file(&self.remote_path, &self.local_path)
                .await
            {
                Ok(downloaded) => break downloaded,
                Err(err) if err.is_retryable() && attempt + 1 < self.retry_count => {
                    let wait = self.backoff.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        path = %self.remote_path,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "download failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    tracing::error!(
                        path = %self.remote_path,
                        attempts = attempt + 1,
                        error = %err,
                        "download failed, record left at INIT"
                    );
                    return Ok(FileOutcome::Failed(self.local_path, err.to_string()));
                }
            }
        };
        self.bytes.fetch_add(downloaded.bytes, Ordering::Relaxed);

        if let Some(renamed) = renamed_to(&self.local_path, &downloaded) {
            tracing::warn!(
                path = %self.local_path.display(),
                renamed = %renamed.display(),
                "local name taken by a different file, kept both"
            );
        }
        let next = TransferStatus::Init
            .next(TransferEvent::Downloaded)
            .unwrap_or(TransferStatus::NotSent);
        self.store.write(&downloaded.path, 0, next.clone()).await?;
        tracing::info!(
            path = %downloaded.path.display(),
            bytes = downloaded.bytes,
            status = %next,
            "downloaded"
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(FileOutcome::Downloaded)
    }
}

async fn create_dir(path: &Path) -> Result<(), DownloadError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_stale(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed stale local copy");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DownloadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
