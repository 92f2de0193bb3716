//! Fetching of manifests and resources.
//!
//! The engine only relies on [`Transport`]: a GET that can be cancelled, reports
//! incremental bytes and may hand back a [`ResumeToken`] when stopped mid-way.

mod http;

pub use http::HttpTransport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::model::ResumeToken;
use crate::{Result, TransferError};

/// Progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// Writing starts at `offset`; anything reported beyond it by earlier
    /// attempts was discarded.
    Started { offset: u64 },
    /// Bytes written since the previous report.
    Written(u64),
}

pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// One resource transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: Url,
    /// File the transport writes to; the engine moves it into place afterwards.
    pub staging_path: PathBuf,
    /// Token returned by an earlier cancelled transfer of the same resource.
    pub resume: Option<ResumeToken>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Every byte is in `path`.
    Completed { path: PathBuf, bytes: u64 },
    /// Stopped through the cancellation token.
    Cancelled { resume: Option<ResumeToken> },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches a manifest, failing with [`Error::NetworkTimeout`](crate::Error::NetworkTimeout)
    /// when it does not complete within `timeout`.
    async fn fetch_text(&self, url: &Url, timeout: Duration) -> Result<String>;

    /// Fetches one resource into `request.staging_path`.
    ///
    /// Reports [`TransferProgress::Started`] before writing when a resume token
    /// was given, so bytes of a restarted transfer are not counted twice.
    /// Cancellation is not an error: it yields [`TransferOutcome::Cancelled`].
    async fn fetch(
        &self,
        request: TransferRequest,
        progress: ProgressFn,
        token: CancellationToken,
    ) -> std::result::Result<TransferOutcome, TransferError>;
}
