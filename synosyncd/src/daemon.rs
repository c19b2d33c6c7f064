use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use syno_core::{Credentials, FileStationClient};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::sftp::SftpConnector;
use crate::sync::metadata::MetadataMap;
use crate::sync::{
    AdmissionController, DownloadOrchestrator, DownloadReport, MetadataStore, RemoteSource,
    SinkConnector, TransferStatus, UploadOrchestrator, UploadReport, UploadSession,
};

/// What one cycle did. A phase that was skipped by configuration is `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub download: Option<DownloadReport>,
    pub upload: Option<UploadReport>,
}

pub struct DaemonRuntime {
    config: Config,
    store: MetadataStore,
    admission: AdmissionController,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: Config) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.local_path)
            .await
            .with_context(|| format!("failed to create local root at {:?}", config.local_path))?;

        Ok(Self {
            admission: AdmissionController::new(config.workers),
            store: MetadataStore::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs a cycle now and then every `sync_cycle_hours` until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            local_path = %self.config.local_path.display(),
            synology_path = %self.config.synology.path,
            remote_path = %self.config.remote.path,
            workers = self.admission.capacity(),
            cycle_hours = self.config.sync_cycle_hours,
            "synosyncd started"
        );

        let period = self.config.sync_cycle().max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                result = self.run_cycle() => match result {
                    Ok(report) => tracing::info!(?report, "sync cycle finished"),
                    Err(err) => tracing::error!(error = %format!("{err:#}"), "sync cycle failed, waiting for next tick"),
                },
                _ = &mut shutdown => {
                    tracing::warn!("shutdown requested, abandoning in-flight cycle");
                    break;
                }
            }
        }
        tracing::info!("synosyncd stopped");
        Ok(())
    }

    /// Download phase against FileStation, then upload phase over SFTP.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();

        if self.config.synology.skip {
            tracing::info!("download phase skipped by config");
        } else {
            let synology = &self.config.synology;
            let credentials = Credentials::new(&synology.username, &synology.password);
            let client = FileStationClient::login(&synology.base_url(), &credentials)
                .await
                .context("failed to log in to FileStation")?;
            let client = Arc::new(client);
            let result = self.download_phase(Arc::clone(&client)).await;
            if let Err(err) = client.logout().await {
                tracing::warn!(error = %err, "FileStation logout failed");
            }
            report.download = Some(result?);
        }

        if self.config.remote.skip {
            tracing::info!("upload phase skipped by config");
        } else {
            let remote = &self.config.remote;
            let connector = Arc::new(SftpConnector::new(
                &remote.host,
                remote.port,
                &remote.username,
                &remote.password,
            ));
            report.upload = Some(self.upload_phase(connector).await?);
        }

        Ok(report)
    }

    pub async fn download_phase<S>(&self, source: Arc<S>) -> anyhow::Result<DownloadReport>
    where
        S: RemoteSource + 'static,
    {
        let orchestrator = DownloadOrchestrator::new(
            source,
            self.store.clone(),
            self.admission.clone(),
            self.config.download_settings(),
        );
        let report = orchestrator.run().await.context("download phase failed")?;
        for (path, error) in &report.failures {
            tracing::error!(path = %path.display(), error = %error, "file left for next cycle");
        }
        Ok(report)
    }

    pub async fn upload_phase(
        &self,
        connector: Arc<dyn SinkConnector>,
    ) -> anyhow::Result<UploadReport> {
        let mut session = UploadSession::connect(connector)
            .await
            .context("failed to open upload session")?;
        let orchestrator = UploadOrchestrator::new(
            self.store.clone(),
            self.admission.clone(),
            self.config.upload_settings(),
        );
        orchestrator
            .run(&mut session)
            .await
            .context("upload phase failed")
    }
}

/// Every record under the local root with the given status.
pub async fn scan(config: &Config, status: &TransferStatus) -> anyhow::Result<MetadataMap> {
    MetadataStore::new()
        .scan(&config.local_path, status)
        .await
        .with_context(|| format!("failed to scan {}", config.local_path.display()))
}

pub fn render_scan(records: &MetadataMap) -> String {
    records
        .iter()
        .map(|(path, record)| format!("{}\t{}\t{}\n", record.status, record.size, path.display()))
        .collect()
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
