use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use super::TrackType;

/// Opaque state captured when a transfer is interrupted mid-way.
///
/// Only the transport that produced a token knows how to interpret it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl std::fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResumeToken({} bytes)", self.0.len())
    }
}

/// One fetchable resource of an item: a segment, an init segment or a key.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub item_id: String,
    pub content_url: Url,
    pub track_type: TrackType,
    /// Absolute local path, derived from `(item_id, content_url, track_type)`.
    pub destination: PathBuf,
    /// Position within its media playlist; init segments and the first key use 0.
    pub order: u32,
    pub resume_data: Option<ResumeToken>,
    /// Bytes of this task already counted in the item's downloaded size.
    pub downloaded_bytes: u64,
}

/// Identity of a stored task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub item_id: String,
    pub content_url: Url,
    pub track_type: TrackType,
}

impl DownloadTask {
    pub fn key(&self) -> TaskKey {
        TaskKey {
            item_id: self.item_id.clone(),
            content_url: self.content_url.clone(),
            track_type: self.track_type,
        }
    }

    /// Path the transport writes to before the file is moved to `destination`.
    pub fn staging_path(&self) -> PathBuf {
        let mut staging = self.destination.clone().into_os_string();
        staging.push(".part");
        PathBuf::from(staging)
    }
}
