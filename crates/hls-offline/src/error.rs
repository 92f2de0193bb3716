//! Library-wide error types.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Library-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("item not found: {id}")]
    ItemNotFound { id: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("metadata is already loading for item {id}")]
    MetadataAlreadyLoading { id: String },

    #[error(
        "insufficient disk space: {available_bytes} bytes available, {required_bytes} bytes required"
    )]
    InsufficientDiskSpace {
        available_bytes: u64,
        required_bytes: u64,
    },

    #[error("timed out fetching {url}")]
    NetworkTimeout { url: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("malformed playlist {url}: {reason}")]
    MalformedPlaylist { url: String, reason: String },

    #[error("unknown playlist type `{kind}`")]
    UnknownPlaylistType { kind: String },

    #[error("download already started")]
    DownloadAlreadyStarted,

    #[error("cannot add downloads while the engine is {state}")]
    CannotAddDownloads { state: String },

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::ItemNotFound { id: id.into() }
    }

    pub fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(url: impl ToString, reason: impl Into<String>) -> Self {
        Self::MalformedPlaylist {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Failure of a single resource transfer.
///
/// Kept separate from [`Error`] because it travels through engine events and
/// drives the item-level failure classification.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("no space left on device while writing {path}")]
    DiskFull { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Wraps an I/O error, promoting "storage full" to [`TransferError::DiskFull`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == ErrorKind::StorageFull {
            Self::DiskFull { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_disk_full(&self) -> bool {
        matches!(self, Self::DiskFull { .. })
    }

    /// Whether retrying the same transfer later can succeed.
    ///
    /// Client errors (4xx) are final, everything else is treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self.status() {
            Some(status) => status >= 500,
            None => true,
        }
    }
}
