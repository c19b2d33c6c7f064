use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a mirrored file: `INIT -> NOT_SENT -> SENT | FAILED`.
///
/// Values read back from a sidecar that match none of the four states are kept
/// verbatim in `Unknown` so they survive a rewrite of the sidecar untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransferStatus {
    Init,
    NotSent,
    Sent,
    Failed,
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Downloaded,
    Uploaded,
    UploadExhausted,
}

/// Outcome of comparing a stored record against a fresh remote listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    Keep,
    Reset,
}

/// What the upload walk does with a file in a given state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAction {
    Transfer,
    NotDownloaded,
    AlreadySent,
    AlreadyFailed,
    Unrecognized(String),
}

impl TransferStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransferStatus::Init => "INIT",
            TransferStatus::NotSent => "NOT_SENT",
            TransferStatus::Sent => "SENT",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Unknown(raw) => raw,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "INIT" => TransferStatus::Init,
            "NOT_SENT" => TransferStatus::NotSent,
            "SENT" => TransferStatus::Sent,
            "FAILED" => TransferStatus::Failed,
            other => TransferStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Sent | TransferStatus::Failed)
    }

    /// Legal successor for `event`, or `None` when the transition is not allowed.
    pub fn next(&self, event: TransferEvent) -> Option<TransferStatus> {
        match (self, event) {
            (TransferStatus::Init, TransferEvent::Downloaded) => Some(TransferStatus::NotSent),
            (TransferStatus::NotSent, TransferEvent::Uploaded) => Some(TransferStatus::Sent),
            (TransferStatus::NotSent, TransferEvent::UploadExhausted) => {
                Some(TransferStatus::Failed)
            }
            _ => None,
        }
    }

    pub fn upload_action(&self) -> UploadAction {
        match self {
            TransferStatus::NotSent => UploadAction::Transfer,
            TransferStatus::Init => UploadAction::NotDownloaded,
            TransferStatus::Sent => UploadAction::AlreadySent,
            TransferStatus::Failed => UploadAction::AlreadyFailed,
            TransferStatus::Unknown(raw) => UploadAction::Unrecognized(raw.clone()),
        }
    }
}

/// A record is (re)initialised when it is missing or its recorded size no
/// longer matches the remote listing, whatever state it had reached.
pub fn reconcile(stored_size: Option<u64>, remote_size: u64) -> Reconcile {
    match stored_size {
        Some(size) if size == remote_size => Reconcile::Keep,
        _ => Reconcile::Reset,
    }
}

impl From<String> for TransferStatus {
    fn from(value: String) -> Self {
        TransferStatus::parse(&value)
    }
}

impl From<TransferStatus> for String {
    fn from(value: TransferStatus) -> Self {
        match value {
            TransferStatus::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
