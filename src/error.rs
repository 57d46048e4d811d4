use std::path::PathBuf;

use thiserror::Error;

/// Library-level error taxonomy.
///
/// `CrcMismatch` is the only variant the patch engine recovers from on its
/// own (one remote re-download per affected file, never inside a nested
/// archive). Everything else aborts the in-progress hop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("version `{0}` is not listed in the repository")]
    VersionUnknown(String),

    #[error("no patch path from `{from}` to `{to}`")]
    NoPatchPath { from: String, to: String },

    #[error("protocol violation: {0}")]
    ProtocolMismatch(String),

    #[error("crc mismatch for `{path}` (expected {expected}, actual {actual})")]
    CrcMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("`{path}` is not a valid {format} archive: {reason}")]
    ArchiveFormat {
        path: PathBuf,
        format: &'static str,
        reason: String,
    },

    #[error("invalid version graph: {0}")]
    GraphFormat(String),

    #[error("invalid repository descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reported by a [`DownloadService`](crate::download::DownloadService)
/// collaborator. Retry policy belongs to the collaborator, not this crate.
#[derive(Debug, Error)]
#[error("download failed for `{url}`")]
pub struct DownloadError {
    pub url: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DownloadError {
    pub fn new(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            url: url.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: None,
        }
    }
}

/// Surfaced by [`RepositoryService::checkout`](crate::service::RepositoryService::checkout):
/// the repository, the originally requested target version and the root cause.
#[derive(Debug, Error)]
#[error("checkout of `{target_version}` failed for repository `{repository}`")]
pub struct CheckoutError {
    pub repository: String,
    pub target_version: String,
    #[source]
    pub source: Error,
}

impl CheckoutError {
    pub fn new(repository: impl Into<String>, target_version: impl Into<String>, source: Error) -> Self {
        Self {
            repository: repository.into(),
            target_version: target_version.into(),
            source,
        }
    }
}
