use std::sync::Arc;

use super::remote::{RemoteSink, SinkConnector, SinkError};

/// Owns the current upload connection and replaces it on demand.
pub struct UploadSession {
    connector: Arc<dyn SinkConnector>,
    sink: Box<dyn RemoteSink>,
    reconnects: u32,
}

impl UploadSession {
    pub async fn connect(connector: Arc<dyn SinkConnector>) -> Result<Self, SinkError> {
        let sink = connector.connect().await?;
        Ok(Self {
            connector,
            sink,
            reconnects: 0,
        })
    }

    pub fn sink(&self) -> &dyn RemoteSink {
        self.sink.as_ref()
    }

    /// Swaps in a fresh connection. On failure the old handle is kept.
    pub async fn reconnect(&mut self) -> Result<(), SinkError> {
        let sink = self.connector.connect().await?;
        self.sink = sink;
        self.reconnects += 1;
        tracing::info!(reconnects = self.reconnects, "upload session re-established");
        Ok(())
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }
}
