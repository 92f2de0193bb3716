use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Codec;

/// Ratio applied to a legacy "preferred bitrate" to derive the HEVC minimum,
/// HEVC reaching comparable quality at a lower bitrate.
pub const HEVC_BITRATE_FACTOR: f64 = 0.70;

/// Policy for picking renditions out of a multi-variant manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionOptions {
    /// Audio languages to download; ignored when `all_audio_languages` is set.
    pub audio_languages: Vec<String>,
    pub all_audio_languages: bool,

    /// Text languages to download; ignored when `all_text_languages` is set.
    pub text_languages: Vec<String>,
    pub all_text_languages: bool,

    /// Minimum preferred width; the smallest stream at least this wide wins.
    pub video_width: Option<u64>,
    pub video_height: Option<u64>,

    /// Video codec priority. Codecs not listed follow in default order.
    pub video_codecs: Vec<Codec>,
    /// Audio codec priority. Codecs not listed follow in default order.
    pub audio_codecs: Vec<Codec>,

    /// Minimum bitrate per video codec.
    pub video_bitrates: HashMap<Codec, u64>,

    /// Keep codecs the host can only decode in software.
    pub allow_inefficient_codecs: bool,
}

impl SelectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options equivalent to the single "preferred video bitrate" knob:
    /// AVC at `bitrate`, HEVC at [`HEVC_BITRATE_FACTOR`] of it.
    pub fn with_preferred_bitrate(bitrate: u64) -> Self {
        Self::default()
            .with_video_bitrate(Codec::Avc1, bitrate)
            .with_video_bitrate(Codec::Hevc, (bitrate as f64 * HEVC_BITRATE_FACTOR) as u64)
    }

    pub fn with_audio_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audio_languages = languages.into_iter().map(Into::into).collect();
        self.all_audio_languages = false;
        self
    }

    pub fn with_all_audio_languages(mut self) -> Self {
        self.all_audio_languages = true;
        self
    }

    pub fn with_text_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text_languages = languages.into_iter().map(Into::into).collect();
        self.all_text_languages = false;
        self
    }

    pub fn with_all_text_languages(mut self) -> Self {
        self.all_text_languages = true;
        self
    }

    pub fn with_video_width(mut self, width: u64) -> Self {
        self.video_width = Some(width);
        self
    }

    pub fn with_video_height(mut self, height: u64) -> Self {
        self.video_height = Some(height);
        self
    }

    pub fn with_video_codecs(mut self, codecs: impl IntoIterator<Item = Codec>) -> Self {
        self.video_codecs = codecs.into_iter().filter(Codec::is_video).collect();
        self
    }

    pub fn with_audio_codecs(mut self, codecs: impl IntoIterator<Item = Codec>) -> Self {
        self.audio_codecs = codecs.into_iter().filter(|c| !c.is_video()).collect();
        self
    }

    pub fn with_video_bitrate(mut self, codec: Codec, bitrate: u64) -> Self {
        self.video_bitrates.insert(codec, bitrate);
        self
    }

    pub fn with_allow_inefficient_codecs(mut self, allow: bool) -> Self {
        self.allow_inefficient_codecs = allow;
        self
    }
}
