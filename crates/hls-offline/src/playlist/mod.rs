//! Typed manifest tree and the adapter over the manifest-parsing library.
//!
//! Everything downstream (selection, localization) works on these types only,
//! so the parser behind [`ManifestParser`] is interchangeable.

pub(crate) mod attributes;
mod m3u8;

pub use m3u8::M3u8Parser;

use url::Url;

use crate::{Error, Result};

pub(crate) const EXT_X_KEY: &str = "#EXT-X-KEY:";
pub(crate) const EXT_X_MAP: &str = "#EXT-X-MAP:";
pub(crate) const EXT_X_MEDIA: &str = "#EXT-X-MEDIA:";
pub(crate) const EXT_X_STREAM_INF: &str = "#EXT-X-STREAM-INF:";
pub(crate) const EXT_X_I_FRAME_STREAM_INF: &str = "#EXT-X-I-FRAME-STREAM-INF:";

/// Key format of FairPlay keys; these are acquired through DRM, never downloaded.
pub(crate) const KEYFORMAT_FAIRPLAY: &str = "com.apple.streamingkeydelivery";

/// Returns the key URI of an `EXT-X-KEY` line when the key is a plain
/// downloadable key (not `METHOD=NONE`, not FairPlay).
pub(crate) fn downloadable_key_uri(line: &str) -> Option<&str> {
    if !line.starts_with(EXT_X_KEY) {
        return None;
    }
    if attributes::attribute(line, "METHOD").is_some_and(|m| m.eq_ignore_ascii_case("NONE")) {
        return None;
    }
    if attributes::attribute(line, "KEYFORMAT") == Some(KEYFORMAT_FAIRPLAY) {
        return None;
    }
    attributes::attribute(line, "URI")
}

/// Resolves a (possibly relative) manifest reference against the manifest URL.
pub(crate) fn resolve(base: &Url, reference: &str) -> Result<Url> {
    base.join(reference.trim())
        .map_err(|e| Error::malformed(base, format!("cannot resolve `{reference}`: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

/// One `EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantStream {
    pub uri: Url,
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    /// Individual codec tags, e.g. `["avc1.64001f", "mp4a.40.2"]`.
    pub codecs: Vec<String>,
    pub audio_group: Option<String>,
    pub subtitle_group: Option<String>,
}

impl VariantStream {
    /// Whether any codec tag starts with `prefix` (`"avc1"`, `"hvc1"`, ...).
    pub fn has_codec(&self, prefix: &str) -> bool {
        self.codecs.iter().any(|c| c.starts_with(prefix))
    }

    pub fn width(&self) -> u64 {
        self.resolution.map(|r| r.width).unwrap_or(0)
    }

    pub fn height(&self) -> u64 {
        self.resolution.map(|r| r.height).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionKind {
    Audio,
    Subtitles,
    Video,
    ClosedCaptions,
}

/// One `EXT-X-MEDIA` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub kind: RenditionKind,
    /// `None` when the rendition is carried inside the variant stream.
    pub uri: Option<Url>,
    pub group_id: String,
    pub language: Option<String>,
    pub name: String,
    pub is_default: bool,
    /// Non-standard `BANDWIDTH` attribute some packagers add.
    pub bandwidth: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MasterManifest {
    pub url: Url,
    pub text: String,
    /// Regular variants in manifest order; I-frame variants are excluded.
    pub variants: Vec<VariantStream>,
    pub renditions: Vec<Rendition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: Url,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct MediaManifest {
    pub url: Url,
    pub text: String,
    pub segments: Vec<Segment>,
    /// Distinct `EXT-X-MAP` targets in order of appearance.
    pub init_segments: Vec<Url>,
    /// Distinct downloadable key URIs in order of appearance.
    pub keys: Vec<Url>,
}

impl MediaManifest {
    pub fn duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Parses manifest text fetched from `url` into the typed tree.
///
/// Relative references are resolved against `url`.
pub trait ManifestParser: Send + Sync {
    fn parse_master(&self, text: &str, url: &Url) -> Result<MasterManifest>;

    fn parse_media(&self, text: &str, url: &Url) -> Result<MediaManifest>;
}
