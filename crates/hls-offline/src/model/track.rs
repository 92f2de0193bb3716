use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Kind of resource a task fetches, which also names its subdirectory on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
    Text,
    Key,
}

impl TrackType {
    pub const ALL: [TrackType; 4] = [Self::Video, Self::Audio, Self::Text, Self::Key];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Key => "key",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "text" => Some(Self::Text),
            "key" => Some(Self::Key),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid track type: {s}"))
    }
}

/// Catalog entry for an audio or text rendition.
///
/// Two entries are equal when their language and title match; the track type
/// is carried along but does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_type: TrackType,
    pub language_code: Option<String>,
    pub title: String,
}

impl TrackInfo {
    pub fn audio(language_code: Option<String>, title: impl Into<String>) -> Self {
        Self {
            track_type: TrackType::Audio,
            language_code,
            title: title.into(),
        }
    }

    pub fn text(language_code: Option<String>, title: impl Into<String>) -> Self {
        Self {
            track_type: TrackType::Text,
            language_code,
            title: title.into(),
        }
    }
}

impl PartialEq for TrackInfo {
    fn eq(&self, other: &Self) -> bool {
        self.language_code == other.language_code && self.title == other.title
    }
}

impl Eq for TrackInfo {}

impl Hash for TrackInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.language_code.hash(state);
        self.title.hash(state);
    }
}
