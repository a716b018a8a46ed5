//! Error types for engage-assets.

use std::io;
use std::path::{Path, PathBuf};

use engage_types::Digest;
use thiserror::Error;

/// Broad failure classes surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Disk I/O failed.
    Io,
    /// Transfer failed; retryable.
    Network,
    /// Received bytes did not match the requested digest.
    Integrity,
    /// The disk is full.
    Capacity,
}

/// Errors from asset store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// No space left on the device.
    #[error("disk full while writing {path}")]
    Capacity {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Asset is not in the store.
    #[error("asset not found: {digest}")]
    NotFound {
        /// Digest of the missing asset.
        digest: Digest,
    },
}

impl StoreError {
    /// Classify an I/O error for `path`.
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        if is_storage_full(&source) {
            Self::Capacity {
                path: path.to_path_buf(),
                source,
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Capacity { .. } => FailureKind::Capacity,
            Self::Io { .. } | Self::NotFound { .. } => FailureKind::Io,
        }
    }
}

/// ENOSPC on Linux and macOS.
const ENOSPC: i32 = 28;

fn is_storage_full(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ENOSPC)
}

/// Errors reported by a [`Downloader`](crate::Downloader).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Connection or transfer failed.
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Terminal outcome of a failed download task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetFailure {
    /// Transfer kept failing until attempts ran out.
    #[error("download failed: {message}")]
    Network {
        /// Last transport error.
        message: String,
    },

    /// Server kept answering with a non-success status.
    #[error("download failed with status {status}")]
    Status {
        /// Last status code.
        status: u16,
    },

    /// Received content hashed to a different digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    Integrity {
        /// Requested digest.
        expected: Digest,
        /// Digest of the bytes actually received.
        actual: Digest,
    },

    /// Writing the asset to the store failed.
    #[error("store write failed: {0}")]
    Io(String),

    /// The store ran out of space.
    #[error("store is full: {0}")]
    Capacity(String),

    /// The download workers stopped before the task finished.
    #[error("download cancelled")]
    Cancelled,
}

impl AssetFailure {
    /// Failure class of this outcome.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } | Self::Status { .. } | Self::Cancelled => FailureKind::Network,
            Self::Integrity { .. } => FailureKind::Integrity,
            Self::Io(_) => FailureKind::Io,
            Self::Capacity(_) => FailureKind::Capacity,
        }
    }
}

impl From<DownloadError> for AssetFailure {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Network(message) => Self::Network { message },
            DownloadError::Status(status) => Self::Status { status },
        }
    }
}

impl From<StoreError> for AssetFailure {
    fn from(err: StoreError) -> Self {
        match err.kind() {
            FailureKind::Capacity => Self::Capacity(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}
