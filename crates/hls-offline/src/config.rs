use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = concat!("hls-offline/", env!("CARGO_PKG_VERSION"));

/// Configuration for the [`WorkQueue`](crate::queue::WorkQueue) compaction policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backing storage must exceed this many slots before compaction is considered.
    pub min_compaction_size: usize,

    /// Fraction of consumed leading slots that triggers compaction.
    pub compaction_threshold: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_compaction_size: 50,
            compaction_threshold: 0.25,
        }
    }
}

/// Top-level configuration shared by every component of the content manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Root directory; items are stored under `<storage_path>/items/`.
    pub storage_path: PathBuf,

    /// Maximum number of concurrent transfers per item.
    pub max_concurrent_downloads: usize,

    /// Bounded wait for every manifest fetch during metadata loading.
    #[serde(with = "duration_ms")]
    pub manifest_fetch_timeout: Duration,

    /// Bitrate (bps) assumed for audio renditions that do not declare one.
    pub audio_bitrate_estimation: u64,

    /// Free space (bytes) that must remain after the remaining estimate is downloaded.
    pub min_free_disk_space: u64,

    /// Minimum interval between two progress notifications for the same item.
    #[serde(with = "duration_ms")]
    pub progress_throttle: Duration,

    /// User agent sent with every request of the default HTTP transport.
    pub user_agent: String,

    /// Work queue compaction policy.
    pub queue: QueueConfig,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("downloads"),
            max_concurrent_downloads: 4,
            manifest_fetch_timeout: Duration::from_secs(10),
            audio_bitrate_estimation: 64_000,
            min_free_disk_space: 200 * 1024 * 1024,
            progress_throttle: Duration::from_millis(200),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            queue: QueueConfig::default(),
        }
    }
}

impl OfflineConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max.max(1);
        self
    }

    pub fn with_manifest_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.manifest_fetch_timeout = timeout;
        self
    }

    pub fn with_audio_bitrate_estimation(mut self, bitrate: u64) -> Self {
        self.audio_bitrate_estimation = bitrate;
        self
    }

    pub fn with_min_free_disk_space(mut self, bytes: u64) -> Self {
        self.min_free_disk_space = bytes;
        self
    }

    pub fn with_progress_throttle(mut self, throttle: Duration) -> Self {
        self.progress_throttle = throttle;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Directory holding every item's files.
    pub fn items_dir(&self) -> PathBuf {
        self.storage_path.join("items")
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();
        assert_eq!(config.max_concurrent_downloads, 4);
        assert_eq!(config.manifest_fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.audio_bitrate_estimation, 64_000);
        assert_eq!(config.queue.min_compaction_size, 50);
        assert_eq!(config.queue.compaction_threshold, 0.25);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OfflineConfig =
            serde_json::from_str(r#"{"storage_path":"/data","manifest_fetch_timeout":2500}"#)
                .unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/data"));
        assert_eq!(config.manifest_fetch_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_concurrent_downloads, 4);
        assert_eq!(config.items_dir(), PathBuf::from("/data/items"));
    }

    #[test]
    fn test_concurrency_is_at_least_one() {
        let config = OfflineConfig::default().with_max_concurrent_downloads(0);
        assert_eq!(config.max_concurrent_downloads, 1);
    }
}
