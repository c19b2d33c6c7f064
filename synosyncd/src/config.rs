use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::AdmissionController;
use crate::sync::download::DownloadSettings;
use crate::sync::upload::UploadSettings;

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";
pub const CONFIG_PATH_ENV: &str = "SYNOSYNC_CONFIG";

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} not found, a default one was written to {DEFAULT_CONFIG_PATH}")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SynologyConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub path: String,
    pub https: bool,
    pub skip: bool,
}

impl Default for SynologyConfig {
    fn default() -> Self {
        Self {
            host: "1.2.3.4".to_string(),
            port: 5001,
            username: "admin".to_string(),
            password: "pass".to_string(),
            path: "/photo".to_string(),
            https: false,
            skip: false,
        }
    }
}

impl SynologyConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub path: String,
    pub skip: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.100".to_string(),
            port: 22,
            username: "user".to_string(),
            password: "pass".to_string(),
            path: "/DCIM".to_string(),
            skip: false,
        }
    }
}

/// Throttling for one phase. Delays are in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhaseConfig {
    pub delay: u64,
    pub retry_delay: u64,
    pub retry_count: u32,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            delay: 10,
            retry_delay: 2,
            retry_count: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub synology: SynologyConfig,
    pub remote: RemoteConfig,
    pub local_path: PathBuf,
    pub spare_space: u64,
    pub sync_cycle_hours: u64,
    pub workers: usize,
    pub progress_interval_secs: u64,
    pub listing_path: Option<PathBuf>,
    pub download: PhaseConfig,
    pub upload: PhaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            synology: SynologyConfig::default(),
            remote: RemoteConfig::default(),
            local_path: std::env::current_dir().unwrap_or_default(),
            spare_space: GIB,
            sync_cycle_hours: 12,
            workers: AdmissionController::default_workers(),
            progress_interval_secs: 10,
            listing_path: None,
            download: PhaseConfig::default(),
            upload: PhaseConfig::default(),
        }
    }
}

impl Config {
    /// Path from `--config`, then `SYNOSYNC_CONFIG`, then `./config.json`.
    pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Reads and validates `path`. When it does not exist a default config is
    /// written to [`DEFAULT_CONFIG_PATH`] (unless one is already there) and
    /// [`ConfigError::Missing`] is returned.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found");
                write_default(Path::new(DEFAULT_CONFIG_PATH))?;
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config: Config = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.synology.skip {
            require_endpoint(
                "synology",
                &self.synology.host,
                self.synology.port,
                &self.synology.username,
                &self.synology.password,
                &self.synology.path,
            )?;
        }
        if !self.remote.skip {
            require_endpoint(
                "remote",
                &self.remote.host,
                self.remote.port,
                &self.remote.username,
                &self.remote.password,
                &self.remote.path,
            )?;
        }
        if self.local_path.as_os_str().is_empty() {
            return Err(invalid("local path is required"));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if self.download.retry_count == 0 || self.upload.retry_count == 0 {
            return Err(invalid("retry counts must be at least 1"));
        }
        if self.sync_cycle_hours == 0 {
            return Err(invalid("sync cycle must be at least one hour"));
        }
        Ok(())
    }

    pub fn sync_cycle(&self) -> Duration {
        Duration::from_secs(self.sync_cycle_hours.saturating_mul(3600))
    }

    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            remote_root: self.synology.path.clone(),
            local_root: self.local_path.clone(),
            delay: Duration::from_secs(self.download.delay),
            retry_delay: Duration::from_secs(self.download.retry_delay),
            retry_count: self.download.retry_count,
            progress_interval: Duration::from_secs(self.progress_interval_secs),
            listing_path: self.listing_path.clone(),
        }
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            local_root: self.local_path.clone(),
            source_root: self.synology.path.clone(),
            destination_root: self.remote.path.clone(),
            spare_space: self.spare_space,
            delay: Duration::from_secs(self.upload.delay),
            retry_delay: Duration::from_secs(self.upload.retry_delay),
            retry_count: self.upload.retry_count,
        }
    }
}

fn require_endpoint(
    side: &str,
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    path: &str,
) -> Result<(), ConfigError> {
    if host.trim().is_empty() {
        return Err(invalid(format!("{side} host is required")));
    }
    if port == 0 {
        return Err(invalid(format!("invalid {side} port number")));
    }
    if username.is_empty() {
        return Err(invalid(format!("{side} username is required")));
    }
    if password.is_empty() {
        return Err(invalid(format!("{side} password is required")));
    }
    if path.is_empty() {
        return Err(invalid(format!("{side} path is required")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn write_default(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    let encoded = serde_json::to_vec_pretty(&Config::default()).map_err(|source| {
        ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;
    std::fs::write(path, encoded).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "wrote default config");
    Ok(())
}

impl std::fmt::Debug for SynologyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynologyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .field("https", &self.https)
            .field("skip", &self.skip)
            .finish()
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .field("skip", &self.skip)
            .finish()
    }
}
