mod auth;
mod client;

pub use auth::{Credentials, Session};
pub use client::{
    ApiErrorClass, DownloadedFile, FileStationClient, RemoteEntry, SynoError, unique_path,
};
