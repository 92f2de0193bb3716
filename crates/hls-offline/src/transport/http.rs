use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use super::{ProgressFn, TransferOutcome, TransferProgress, TransferRequest, Transport};
use crate::config::OfflineConfig;
use crate::model::ResumeToken;
use crate::{Error, Result, TransferError};

/// Partial files shorter than this are restarted instead of resumed.
const MIN_RESUME_BYTES: u64 = 200;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Contents of a [`ResumeToken`] produced by [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PartialTransfer {
    path: PathBuf,
    offset: u64,
}

impl PartialTransfer {
    fn into_token(self) -> Option<ResumeToken> {
        if self.offset < MIN_RESUME_BYTES {
            return None;
        }
        serde_json::to_vec(&self).ok().map(ResumeToken::from_bytes)
    }

    fn from_token(token: &ResumeToken) -> Option<Self> {
        serde_json::from_slice(token.as_bytes()).ok()
    }
}

/// Validates a resume token against the staging file and returns the byte
/// offset to continue from. The file is truncated to the recorded offset.
async fn resume_offset(token: &ResumeToken, staging_path: &Path) -> u64 {
    let Some(partial) = PartialTransfer::from_token(token) else {
        debug!(path = %staging_path.display(), "Discarding unreadable resume token");
        return 0;
    };
    if partial.path != staging_path {
        return 0;
    }
    let Ok(file) = OpenOptions::new().write(true).open(staging_path).await else {
        return 0;
    };
    match file.metadata().await {
        Ok(meta) if meta.len() >= partial.offset => {
            if file.set_len(partial.offset).await.is_err() {
                return 0;
            }
            partial.offset
        }
        _ => 0,
    }
}

/// [`Transport`] over HTTP(S) with `reqwest`.
///
/// Resources are streamed to the staging path; cancelled transfers record the
/// staging path and byte offset so the next attempt can send a `Range` request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &OfflineConfig) -> Result<Self> {
        install_rustls_provider();
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(TransferError::from)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn open_staging(
        path: &Path,
        append: bool,
    ) -> std::result::Result<File, TransferError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }
        let file = if append {
            OpenOptions::new().append(true).open(path).await
        } else {
            File::create(path).await
        };
        file.map_err(|e| TransferError::io(path, e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_text(&self, url: &Url, timeout: Duration) -> Result<String> {
        let timed_out = |e: reqwest::Error| {
            if e.is_timeout() {
                Error::NetworkTimeout {
                    url: url.to_string(),
                }
            } else {
                Error::Transfer(TransferError::Request(e))
            }
        };

        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(timed_out)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }
        response.text().await.map_err(timed_out)
    }

    async fn fetch(
        &self,
        request: TransferRequest,
        progress: ProgressFn,
        token: CancellationToken,
    ) -> std::result::Result<TransferOutcome, TransferError> {
        let TransferRequest {
            url,
            staging_path,
            resume,
        } = request;

        let offset = match &resume {
            Some(resume) => resume_offset(resume, &staging_path).await,
            None => 0,
        };

        let mut builder = self.client.get(url.as_str());
        if offset > 0 {
            builder = builder.header(header::RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            response = builder.send() => response?,
            _ = token.cancelled() => {
                let resume = PartialTransfer { path: staging_path, offset }.into_token();
                return Ok(TransferOutcome::Cancelled { resume });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !append {
            debug!(url = %url, "Server ignored range request, restarting transfer");
        }
        let mut file = Self::open_staging(&staging_path, append).await?;
        let mut written = if append { offset } else { 0 };
        progress(TransferProgress::Started { offset: written });

        let mut stream = response.bytes_stream();
        while let Some(chunk) = tokio::select! {
            chunk = stream.next() => chunk,
            _ = token.cancelled() => {
                file.flush().await.ok();
                trace!(url = %url, bytes = written, "Transfer cancelled");
                let resume = PartialTransfer { path: staging_path, offset: written }.into_token();
                return Ok(TransferOutcome::Cancelled { resume });
            }
        } {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(&staging_path, e))?;
            written += chunk.len() as u64;
            progress(TransferProgress::Written(chunk.len() as u64));
        }

        file.flush()
            .await
            .map_err(|e| TransferError::io(&staging_path, e))?;

        Ok(TransferOutcome::Completed {
            path: staging_path,
            bytes: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_partials_are_not_resumable() {
        let partial = PartialTransfer {
            path: PathBuf::from("/tmp/a.ts.part"),
            offset: MIN_RESUME_BYTES - 1,
        };
        assert!(partial.into_token().is_none());
    }

    #[test]
    fn test_token_round_trip() {
        let partial = PartialTransfer {
            path: PathBuf::from("/tmp/a.ts.part"),
            offset: 4096,
        };
        let token = partial.clone().into_token().unwrap();
        assert_eq!(PartialTransfer::from_token(&token), Some(partial));
        assert!(PartialTransfer::from_token(&ResumeToken::from_bytes(b"junk".to_vec())).is_none());
    }

    #[tokio::test]
    async fn test_resume_offset_truncates_to_recorded_offset() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("seg.ts.part");
        fs::write(&staging, vec![7u8; 1000]).await.unwrap();

        let token = PartialTransfer {
            path: staging.clone(),
            offset: 600,
        }
        .into_token()
        .unwrap();

        assert_eq!(resume_offset(&token, &staging).await, 600);
        assert_eq!(fs::metadata(&staging).await.unwrap().len(), 600);
    }

    #[tokio::test]
    async fn test_resume_offset_rejects_short_or_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("seg.ts.part");
        fs::write(&staging, vec![7u8; 300]).await.unwrap();

        let too_far = PartialTransfer {
            path: staging.clone(),
            offset: 900,
        }
        .into_token()
        .unwrap();
        assert_eq!(resume_offset(&too_far, &staging).await, 0);

        let elsewhere = PartialTransfer {
            path: dir.path().join("other.part"),
            offset: 250,
        }
        .into_token()
        .unwrap();
        assert_eq!(resume_offset(&elsewhere, &staging).await, 0);
    }

    #[test]
    fn test_new_client() {
        assert!(HttpTransport::new(&OfflineConfig::default()).is_ok());
    }
}
