//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hls_offline::transport::{
    ProgressFn, TransferOutcome, TransferProgress, TransferRequest, Transport,
};
use hls_offline::{
    ContentManager, DownloadItem, Error, ItemEvent, ItemState, MemoryStore, OfflineConfig,
    ResumeToken, Result, TransferError,
};
use hls_offline::disk::FixedSpaceProbe;
use hls_offline::store::ItemStore;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const FIXTURE_HOST: &str = "https://fixtures.test";
pub const SEGMENT_SIZE: usize = 1024;

/// Master playlist URL of a fixture set under `tests/fixtures/`.
pub fn fixture_url(set: &str) -> String {
    format!("{FIXTURE_HOST}/{set}/master.m3u8")
}

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Deterministic body of a synthetic resource.
pub fn segment_body(url: &Url) -> Vec<u8> {
    url.as_str().bytes().cycle().take(SEGMENT_SIZE).collect()
}

/// Serves playlists from `tests/fixtures/` and synthetic bytes for anything
/// else.
///
/// Requests can be made to fail by path, manifest fetches can be delayed,
/// and `hold` keeps every transfer half-done until it is cancelled. Without
/// resume support, cancelled transfers hand back no token.
#[derive(Default)]
pub struct FixtureTransport {
    failures: Mutex<HashMap<String, u16>>,
    requests: Mutex<Vec<TransferRequest>>,
    manifest_delay: Mutex<Option<Duration>>,
    hold: AtomicBool,
    no_resume: AtomicBool,
}

impl FixtureTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers requests for `path` with `status`.
    pub fn fail_path(&self, path: &str, status: u16) {
        self.failures.lock().insert(path.to_owned(), status);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn set_manifest_delay(&self, delay: Duration) {
        *self.manifest_delay.lock() = Some(delay);
    }

    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn set_resumable(&self, resumable: bool) {
        self.no_resume.store(!resumable, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().clone()
    }

    /// Waits until at least `n` transfers were requested.
    pub async fn wait_for_requests(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.requests.lock().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("transfers were not requested in time");
    }
}

fn encode_offset(offset: u64) -> ResumeToken {
    ResumeToken::from_bytes(offset.to_be_bytes().to_vec())
}

fn decode_offset(token: &ResumeToken) -> u64 {
    token
        .as_bytes()
        .try_into()
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn fetch_text(&self, url: &Url, _timeout: Duration) -> Result<String> {
        let delay = *self.manifest_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if url.path().contains("/timeout/") {
            return Err(Error::NetworkTimeout {
                url: url.to_string(),
            });
        }
        let path = fixtures_dir().join(url.path().trim_start_matches('/'));
        tokio::fs::read_to_string(&path).await.map_err(|_| {
            Error::Transfer(TransferError::Http {
                status: 404,
                url: url.to_string(),
            })
        })
    }

    async fn fetch(
        &self,
        request: TransferRequest,
        progress: ProgressFn,
        token: CancellationToken,
    ) -> std::result::Result<TransferOutcome, TransferError> {
        self.requests.lock().push(request.clone());

        let status = self.failures.lock().get(request.url.path()).copied();
        if let Some(status) = status {
            return Err(TransferError::Http {
                status,
                url: request.url.to_string(),
            });
        }

        let body = segment_body(&request.url);
        let staging = &request.staging_path;
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        if self.hold.load(Ordering::SeqCst) {
            let half = body.len() / 2;
            tokio::fs::write(staging, &body[..half])
                .await
                .map_err(|e| TransferError::io(staging, e))?;
            progress(TransferProgress::Started { offset: 0 });
            progress(TransferProgress::Written(half as u64));
            token.cancelled().await;
            let resume = if self.no_resume.load(Ordering::SeqCst) {
                None
            } else {
                Some(encode_offset(half as u64))
            };
            return Ok(TransferOutcome::Cancelled { resume });
        }

        let offset = request
            .resume
            .as_ref()
            .map(decode_offset)
            .unwrap_or(0)
            .min(body.len() as u64) as usize;
        progress(TransferProgress::Started {
            offset: offset as u64,
        });
        if offset > 0 {
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(staging)
                .await
                .map_err(|e| TransferError::io(staging, e))?;
            file.write_all(&body[offset..])
                .await
                .map_err(|e| TransferError::io(staging, e))?;
            file.flush().await.map_err(|e| TransferError::io(staging, e))?;
        } else {
            tokio::fs::write(staging, &body)
                .await
                .map_err(|e| TransferError::io(staging, e))?;
        }
        progress(TransferProgress::Written((body.len() - offset) as u64));

        Ok(TransferOutcome::Completed {
            path: staging.clone(),
            bytes: body.len() as u64,
        })
    }
}

pub struct Harness {
    pub manager: ContentManager,
    pub transport: Arc<FixtureTransport>,
    pub storage: tempfile::TempDir,
}

pub fn config(storage: &Path) -> OfflineConfig {
    OfflineConfig::new(storage)
        .with_max_concurrent_downloads(2)
        .with_progress_throttle(Duration::ZERO)
        .with_min_free_disk_space(0)
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

pub fn harness_with_store(store: Arc<dyn ItemStore>) -> Harness {
    let storage = tempfile::tempdir().unwrap();
    let transport = FixtureTransport::new();
    let manager = ContentManager::builder(config(storage.path()))
        .transport(transport.clone())
        .store(store)
        .space_probe(Arc::new(FixedSpaceProbe(Some(u64::MAX))))
        .build()
        .unwrap();
    Harness {
        manager,
        transport,
        storage,
    }
}

/// Waits for the item to reach `state`, returning the error text it carried.
pub async fn wait_for_state(
    events: &mut broadcast::Receiver<ItemEvent>,
    id: &str,
    state: ItemState,
) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(ItemEvent::StateChanged {
                    item_id,
                    state: s,
                    error,
                }) if item_id == id && s == state => return error,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("item {id} did not reach {state}"))
}

/// Every file below `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

pub fn assert_close(actual: u64, expected: u64) {
    assert!(
        actual.abs_diff(expected) <= 2,
        "expected about {expected}, got {actual}"
    );
}

pub fn item_summary(item: &DownloadItem) -> (ItemState, Option<u64>, Option<u64>) {
    (item.state, item.total_task_count, item.completed_task_count)
}
