use serde::{Deserialize, Serialize};

/// Codecs the selection engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avc1,
    Hevc,
    Mp4a,
    Ac3,
    Eac3,
}

impl Codec {
    /// Default video priority: HEVC first when the host can play it.
    pub const DEFAULT_VIDEO_ORDER: [Codec; 2] = [Codec::Hevc, Codec::Avc1];

    pub const DEFAULT_AUDIO_ORDER: [Codec; 3] = [Codec::Eac3, Codec::Ac3, Codec::Mp4a];

    /// Prefix of the RFC 6381 codec tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Avc1 => "avc1",
            Self::Hevc => "hvc1",
            Self::Mp4a => "mp4a",
            Self::Ac3 => "ac-3",
            Self::Eac3 => "ec-3",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Avc1 | Self::Hevc)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avc1" | "avc" | "h264" => Some(Self::Avc1),
            "hvc1" | "hev1" | "hevc" | "h265" => Some(Self::Hevc),
            "mp4a" | "aac" => Some(Self::Mp4a),
            "ac-3" | "ac3" => Some(Self::Ac3),
            "ec-3" | "eac3" => Some(Self::Eac3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid codec: {s}"))
    }
}

/// Codec capabilities of the playback host, supplied by the embedding application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSupport {
    pub hardware_hevc: bool,
    /// HEVC decodable in software only; used when inefficient codecs are allowed.
    pub software_hevc: bool,
    pub ac3: bool,
    pub ec3: bool,
}

impl CodecSupport {
    /// Host that plays everything this engine knows about.
    pub fn all() -> Self {
        Self {
            hardware_hevc: true,
            software_hevc: true,
            ac3: true,
            ec3: true,
        }
    }

    pub fn allows(&self, codec: Codec, allow_inefficient: bool) -> bool {
        match codec {
            Codec::Avc1 | Codec::Mp4a => true,
            Codec::Hevc => self.hardware_hevc || (self.software_hevc && allow_inefficient),
            Codec::Ac3 => self.ac3,
            Codec::Eac3 => self.ec3,
        }
    }
}

/// Requested codecs first, then every default codec not mentioned, all filtered
/// by what the host can play.
pub(crate) fn full_priority(
    requested: &[Codec],
    defaults: &[Codec],
    support: &CodecSupport,
    allow_inefficient: bool,
) -> Vec<Codec> {
    let mut order: Vec<Codec> = Vec::with_capacity(defaults.len());
    for codec in requested.iter().chain(defaults) {
        if !order.contains(codec) && support.allows(*codec, allow_inefficient) {
            order.push(*codec);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hevc_gating() {
        let software_only = CodecSupport {
            software_hevc: true,
            ..Default::default()
        };
        assert!(!software_only.allows(Codec::Hevc, false));
        assert!(software_only.allows(Codec::Hevc, true));
        assert!(CodecSupport::default().allows(Codec::Avc1, false));
        assert!(!CodecSupport::default().allows(Codec::Eac3, false));
    }

    #[test]
    fn test_full_priority_appends_defaults() {
        let order = full_priority(
            &[Codec::Avc1],
            &Codec::DEFAULT_VIDEO_ORDER,
            &CodecSupport::all(),
            false,
        );
        assert_eq!(order, vec![Codec::Avc1, Codec::Hevc]);

        let order = full_priority(
            &[],
            &Codec::DEFAULT_AUDIO_ORDER,
            &CodecSupport::default(),
            false,
        );
        assert_eq!(order, vec![Codec::Mp4a]);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("hev1".parse::<Codec>(), Ok(Codec::Hevc));
        assert_eq!("EC-3".parse::<Codec>(), Ok(Codec::Eac3));
        assert!("vp9".parse::<Codec>().is_err());
    }
}
