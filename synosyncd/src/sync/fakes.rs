//! In-memory stand-ins for the FileStation source and the SFTP sink.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syno_core::{DownloadedFile, RemoteEntry, SynoError, unique_path};

use super::remote::{RemoteSink, RemoteSource, SinkConnector, SinkError, SourceError};

fn split(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

#[derive(Default)]
pub struct FakeSource {
    listings: Mutex<HashMap<String, Vec<RemoteEntry>>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, u32>>,
    attempts: Mutex<HashMap<String, u32>>,
    downloads: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn add_dir(&self, path: &str) {
        let (parent, name) = split(path);
        let mut listings = self.listings.lock().unwrap();
        listings.entry(path.to_string()).or_default();
        let siblings = listings.entry(parent).or_default();
        siblings.retain(|e| e.path != path);
        siblings.push(RemoteEntry {
            name,
            path: path.to_string(),
            is_dir: true,
            size: 0,
        });
    }

    /// Adds or replaces a file; its listed size is the length of `contents`.
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let (parent, name) = split(path);
        let mut listings = self.listings.lock().unwrap();
        let siblings = listings.entry(parent).or_default();
        siblings.retain(|e| e.path != path);
        siblings.push(RemoteEntry {
            name,
            path: path.to_string(),
            is_dir: false,
            size: contents.len() as u64,
        });
        self.contents
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
    }

    pub fn fail_downloads(&self, path: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
    }

    /// Keeps `path` in its listing but answers downloads with FileStation code 408.
    pub fn vanish(&self, path: &str) {
        self.contents.lock().unwrap().remove(path);
    }

    pub fn attempts(&self, path: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, SourceError> {
        self.listings
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::Other(format!("no such folder: {path}")))
    }

    async fn download_file(
        &self,
        remote_path: &str,
        destination: &Path,
    ) -> Result<DownloadedFile, SourceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(remote_path.to_string())
            .or_default() += 1;

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(remote_path)
                && *left > 0
            {
                *left -= 1;
                return Err(SourceError::Other(format!("injected failure for {remote_path}")));
            }
        }
        let data = self
            .contents
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or(SourceError::Syno(SynoError::Api { code: 408 }))?;
        self.downloads
            .lock()
            .unwrap()
            .push(remote_path.to_string());

        let target = match tokio::fs::metadata(destination).await {
            Ok(existing) if existing.len() != data.len() as u64 => {
                unique_path(destination).await.unwrap()
            }
            _ => destination.to_path_buf(),
        };
        tokio::fs::create_dir_all(target.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&target, &data).await.unwrap();
        Ok(DownloadedFile {
            path: target,
            bytes: data.len() as u64,
        })
    }
}

#[derive(Default)]
struct SinkState {
    files: BTreeMap<String, u64>,
    free: u64,
    sends: usize,
    removes: Vec<String>,
    connects: usize,
    queued_errors: VecDeque<SinkError>,
}

/// Shared remote filesystem; every connection handed out sees the same state.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<SinkState>>,
}

impl FakeRemote {
    pub fn with_free_space(free: u64) -> Self {
        let remote = Self::default();
        remote.state.lock().unwrap().free = free;
        remote
    }

    pub fn put(&self, path: &str, size: u64) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), size);
    }

    pub fn file_size(&self, path: &str) -> Option<u64> {
        self.state.lock().unwrap().files.get(path).copied()
    }

    /// The next `send_file` fails with `err` instead of writing.
    pub fn fail_next_send(&self, err: SinkError) {
        self.state.lock().unwrap().queued_errors.push_back(err);
    }

    pub fn set_free_space(&self, free: u64) {
        self.state.lock().unwrap().free = free;
    }

    pub fn sends(&self) -> usize {
        self.state.lock().unwrap().sends
    }

    pub fn removes(&self) -> Vec<String> {
        self.state.lock().unwrap().removes.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn connector(&self) -> Arc<dyn SinkConnector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl RemoteSink for FakeRemote {
    async fn stat_size(&self, path: &str) -> Result<Option<u64>, SinkError> {
        Ok(self.file_size(path))
    }

    async fn send_file(&self, local: &Path, remote: &str) -> Result<u64, SinkError> {
        let len = tokio::fs::metadata(local).await?.len();
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.queued_errors.pop_front() {
            return Err(err);
        }
        if state.files.contains_key(remote) {
            return Err(SinkError::AlreadyExists(remote.to_string()));
        }
        state.files.insert(remote.to_string(), len);
        state.sends += 1;
        Ok(len)
    }

    async fn remove_file(&self, path: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.removes.push(path.to_string());
        match state.files.remove(path) {
            Some(_) => Ok(()),
            None => Err(SinkError::NotFound(path.to_string())),
        }
    }

    async fn free_space(&self, _path: &str) -> Result<u64, SinkError> {
        Ok(self.state.lock().unwrap().free)
    }
}

#[async_trait]
impl SinkConnector for FakeRemote {
    async fn connect(&self) -> Result<Box<dyn RemoteSink>, SinkError> {
        self.state.lock().unwrap().connects += 1;
        Ok(Box::new(self.clone()))
    }
}
