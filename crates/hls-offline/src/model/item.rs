use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TrackInfo;

/// Lifecycle state of a [`DownloadItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    /// Added, metadata not loaded yet.
    New,
    /// Renditions selected and tasks created; ready to start.
    MetadataLoaded,
    InProgress,
    Paused,
    Completed,
    /// Failed permanently (e.g. a segment answered 404).
    Failed,
    /// Stopped by a transient failure; can be started again.
    Interrupted,
    Removed,
    /// The store rejected an update while the item was running.
    DbFailure,
}

impl ItemState {
    pub const ALL: [ItemState; 9] = [
        Self::New,
        Self::MetadataLoaded,
        Self::InProgress,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Interrupted,
        Self::Removed,
        Self::DbFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::MetadataLoaded => "metadataLoaded",
            Self::InProgress => "inProgress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Removed => "removed",
            Self::DbFailure => "dbFailure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "metadataLoaded" => Some(Self::MetadataLoaded),
            "inProgress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "interrupted" => Some(Self::Interrupted),
            "removed" => Some(Self::Removed),
            "dbFailure" => Some(Self::DbFailure),
            _ => None,
        }
    }

    /// States from which an item may be (re)started.
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::MetadataLoaded | Self::Paused | Self::Interrupted)
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid item state: {s}"))
    }
}

/// One requested asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub remote_url: String,
    pub state: ItemState,
    pub estimated_size: Option<u64>,
    pub downloaded_size: u64,
    pub total_task_count: Option<u64>,
    pub completed_task_count: Option<u64>,
    /// Seconds, summed over the selected video stream's segments.
    pub duration: Option<f64>,
    pub available_audio_tracks: Vec<TrackInfo>,
    pub available_text_tracks: Vec<TrackInfo>,
    pub selected_audio_tracks: Vec<TrackInfo>,
    pub selected_text_tracks: Vec<TrackInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadItem {
    pub fn new(id: impl Into<String>, remote_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            remote_url: remote_url.into(),
            state: ItemState::New,
            estimated_size: None,
            downloaded_size: 0,
            total_task_count: None,
            completed_task_count: None,
            duration: None,
            available_audio_tracks: Vec::new(),
            available_text_tracks: Vec::new(),
            selected_audio_tracks: Vec::new(),
            selected_text_tracks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Estimated bytes still to download.
    pub fn remaining_estimate(&self) -> u64 {
        self.estimated_size
            .unwrap_or(0)
            .saturating_sub(self.downloaded_size)
    }

    /// Progress in `[0, 1]`.
    ///
    /// Task counts are preferred because size estimates derived from declared
    /// bandwidth can be far off; bytes are used when counts are unavailable.
    pub fn completed_fraction(&self) -> f64 {
        let fraction = match (self.completed_task_count, self.total_task_count) {
            (Some(completed), Some(total)) if total > 0 => completed as f64 / total as f64,
            _ => match self.estimated_size {
                Some(estimated) if estimated > 0 => {
                    self.downloaded_size as f64 / estimated as f64
                }
                _ => 0.0,
            },
        };
        fraction.clamp(0.0, 1.0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            ItemState::New,
            ItemState::MetadataLoaded,
            ItemState::InProgress,
            ItemState::Paused,
            ItemState::Completed,
            ItemState::Failed,
            ItemState::Interrupted,
            ItemState::Removed,
            ItemState::DbFailure,
        ] {
            assert_eq!(state.as_str().parse::<ItemState>(), Ok(state));
        }
    }

    #[test]
    fn test_completed_fraction_prefers_task_counts() {
        let mut item = DownloadItem::new("a", "https://example.com/a.m3u8");
        item.estimated_size = Some(1000);
        item.downloaded_size = 900;
        item.total_task_count = Some(10);
        item.completed_task_count = Some(2);
        assert!((item.completed_fraction() - 0.2).abs() < f64::EPSILON);

        item.total_task_count = None;
        assert!((item.completed_fraction() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_completed_fraction_is_clamped() {
        let mut item = DownloadItem::new("a", "https://example.com/a.m3u8");
        assert_eq!(item.completed_fraction(), 0.0);
        item.estimated_size = Some(100);
        item.downloaded_size = 250;
        assert_eq!(item.completed_fraction(), 1.0);
        assert_eq!(item.remaining_estimate(), 0);
    }
}
