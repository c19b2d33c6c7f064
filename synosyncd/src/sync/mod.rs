pub mod admission;
pub mod backoff;
pub mod download;
#[cfg(test)]
pub(crate) mod fakes;
pub mod metadata;
pub mod paths;
pub mod remote;
pub mod session;
pub mod state;
pub mod tree;
pub mod upload;

pub use admission::AdmissionController;
pub use download::{DownloadOrchestrator, DownloadReport, DownloadSettings};
pub use metadata::MetadataStore;
pub use remote::{RemoteSink, RemoteSource, SinkConnector, SinkError};
pub use session::UploadSession;
pub use state::TransferStatus;
pub use upload::{UploadOrchestrator, UploadReport, UploadSettings};
