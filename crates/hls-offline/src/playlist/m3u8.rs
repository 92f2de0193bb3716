use m3u8_rs::{AlternativeMediaType, Playlist};
use url::Url;

use super::attributes::attribute;
use super::{
    EXT_X_MAP, EXT_X_MEDIA, ManifestParser, MasterManifest, MediaManifest, Rendition,
    RenditionKind, Resolution, Segment, VariantStream, downloadable_key_uri, resolve,
};
use crate::{Error, Result};

/// [`ManifestParser`] backed by `m3u8-rs`.
///
/// `m3u8-rs` drops tags it attaches nowhere (an `EXT-X-MAP` placed before the
/// first segment ends up in `unknown_tags`, non-standard `EXT-X-MEDIA`
/// attributes are not exposed), so maps, keys and rendition bandwidth are read
/// from the raw lines instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct M3u8Parser;

impl M3u8Parser {
    pub fn new() -> Self {
        Self
    }
}

fn ensure_header(text: &str, url: &Url) -> Result<()> {
    if text.trim_start().starts_with("#EXTM3U") {
        Ok(())
    } else {
        Err(Error::malformed(url, "missing #EXTM3U header"))
    }
}

/// Resolves every URI `extract` finds on a line, deduplicated in order.
fn collect_tag_uris<'a>(
    text: &'a str,
    base: &Url,
    extract: impl Fn(&'a str) -> Option<&'a str>,
) -> Result<Vec<Url>> {
    let mut urls: Vec<Url> = Vec::new();
    for line in text.lines().map(str::trim) {
        let Some(uri) = extract(line) else {
            continue;
        };
        let url = resolve(base, uri)?;
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}

impl ManifestParser for M3u8Parser {
    fn parse_master(&self, text: &str, url: &Url) -> Result<MasterManifest> {
        ensure_header(text, url)?;
        let playlist = match m3u8_rs::parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MasterPlaylist(pl)) => pl,
            Ok(Playlist::MediaPlaylist(_)) => {
                return Err(Error::malformed(
                    url,
                    "expected a multi-variant playlist, found a media playlist",
                ));
            }
            Err(e) => return Err(Error::malformed(url, format!("{e:?}"))),
        };

        let variants = playlist
            .variants
            .iter()
            .filter(|v| !v.is_i_frame)
            .map(|v| {
                Ok(VariantStream {
                    uri: resolve(url, &v.uri)?,
                    bandwidth: v.bandwidth,
                    resolution: v.resolution.map(|r| Resolution {
                        width: r.width,
                        height: r.height,
                    }),
                    codecs: v
                        .codecs
                        .as_deref()
                        .map(|c| {
                            c.split(',')
                                .map(|s| s.trim().to_owned())
                                .filter(|s| !s.is_empty())
                                .collect()
                        })
                        .unwrap_or_default(),
                    audio_group: v.audio.clone(),
                    subtitle_group: v.subtitles.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if variants.is_empty() {
            return Err(Error::malformed(url, "no variant streams"));
        }

        // EXT-X-MEDIA lines in document order, matching `alternatives`.
        let media_lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with(EXT_X_MEDIA))
            .collect();
        let aligned = media_lines.len() == playlist.alternatives.len();

        let renditions = playlist
            .alternatives
            .iter()
            .enumerate()
            .map(|(idx, media)| {
                let kind = match &media.media_type {
                    AlternativeMediaType::Audio => RenditionKind::Audio,
                    AlternativeMediaType::Subtitles => RenditionKind::Subtitles,
                    AlternativeMediaType::Video => RenditionKind::Video,
                    AlternativeMediaType::ClosedCaptions => RenditionKind::ClosedCaptions,
                    #[allow(unreachable_patterns)]
                    other => {
                        return Err(Error::UnknownPlaylistType {
                            kind: format!("{other:?}"),
                        });
                    }
                };
                let bandwidth = aligned
                    .then(|| attribute(media_lines[idx], "BANDWIDTH"))
                    .flatten()
                    .and_then(|b| b.parse::<u64>().ok());

                Ok(Rendition {
                    kind,
                    uri: media.uri.as_deref().map(|u| resolve(url, u)).transpose()?,
                    group_id: media.group_id.clone(),
                    language: media.language.clone(),
                    name: media.name.clone(),
                    is_default: media.default,
                    bandwidth,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MasterManifest {
            url: url.clone(),
            text: text.to_owned(),
            variants,
            renditions,
        })
    }

    fn parse_media(&self, text: &str, url: &Url) -> Result<MediaManifest> {
        ensure_header(text, url)?;
        let playlist = match m3u8_rs::parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(Error::malformed(
                    url,
                    "expected a media playlist, found a multi-variant playlist",
                ));
            }
            Err(e) => return Err(Error::malformed(url, format!("{e:?}"))),
        };

        let segments = playlist
            .segments
            .iter()
            .filter(|s| !s.uri.trim().is_empty())
            .map(|s| {
                Ok(Segment {
                    uri: resolve(url, &s.uri)?,
                    duration: f64::from(s.duration),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if segments.is_empty() {
            return Err(Error::malformed(url, "no media segments"));
        }

        let init_segments = collect_tag_uris(text, url, |line| {
            line.starts_with(EXT_X_MAP)
                .then(|| attribute(line, "URI"))
                .flatten()
        })?;
        let keys = collect_tag_uris(text, url, downloadable_key_uri)?;

        Ok(MediaManifest {
            url: url.clone(),
            text: text.to_owned(),
            segments,
            init_segments,
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/vod/asset/master.m3u8").unwrap()
    }

    const MASTER: &str = r#"#EXTM3U
#EXT-X-VERSION:4
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",LANGUAGE="eng",NAME="English",DEFAULT=YES,AUTOSELECT=YES,URI="audio/eng.m3u8"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",LANGUAGE="fra",NAME="Français",DEFAULT=NO,AUTOSELECT=YES,BANDWIDTH=96000,URI="audio/fra.m3u8"
#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID="subs",LANGUAGE="eng",NAME="English",URI="https://subs.example.com/eng.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS="avc1.4d401e,mp4a.40.2",AUDIO="aac",SUBTITLES="subs"
video/360.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,CODECS="hvc1.1.6.L93.B0, mp4a.40.2",AUDIO="aac"
video/hevc.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=90000,URI="video/iframes.m3u8"
"#;

    #[test]
    fn test_parse_master() {
        let master = M3u8Parser.parse_master(MASTER, &base()).unwrap();
        assert_eq!(master.variants.len(), 2);

        let first = &master.variants[0];
        assert_eq!(
            first.uri.as_str(),
            "https://cdn.example.com/vod/asset/video/360.m3u8"
        );
        assert_eq!(first.bandwidth, 800_000);
        assert_eq!(first.width(), 640);
        assert!(first.has_codec("avc1"));
        assert_eq!(first.audio_group.as_deref(), Some("aac"));

        let second = &master.variants[1];
        assert_eq!(second.resolution, None);
        assert_eq!(second.codecs, vec!["hvc1.1.6.L93.B0", "mp4a.40.2"]);

        assert_eq!(master.renditions.len(), 3);
        assert_eq!(master.renditions[0].kind, RenditionKind::Audio);
        assert_eq!(master.renditions[0].bandwidth, None);
        assert!(master.renditions[0].is_default);
        assert_eq!(master.renditions[1].bandwidth, Some(96_000));
        assert_eq!(master.renditions[2].kind, RenditionKind::Subtitles);
        assert_eq!(
            master.renditions[2].uri.as_ref().map(Url::as_str),
            Some("https://subs.example.com/eng.m3u8")
        );
    }

    #[test]
    fn test_media_playlist_as_master_is_malformed() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\na.ts\n#EXT-X-ENDLIST\n";
        let err = M3u8Parser.parse_master(text, &base()).unwrap_err();
        assert!(matches!(err, Error::MalformedPlaylist { .. }));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = M3u8Parser
            .parse_media("<html>not found</html>", &base())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPlaylist { .. }));
    }

    #[test]
    fn test_parse_media_with_map_and_keys() {
        let text = r#"#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:4
#EXT-X-MAP:URI="init.mp4"
#EXT-X-KEY:METHOD=AES-128,URI="https://keys.example.com/k1",IV=0x00000000000000000000000000000001
#EXTINF:4.0,
seg1.m4s
#EXTINF:4.0,
seg2.m4s
#EXT-X-KEY:METHOD=AES-128,URI="https://keys.example.com/k1",IV=0x00000000000000000000000000000002
#EXTINF:2.5,
seg3.m4s
#EXT-X-ENDLIST
"#;
        let url = Url::parse("https://cdn.example.com/vod/asset/video/720.m3u8").unwrap();
        let media = M3u8Parser.parse_media(text, &url).unwrap();

        assert_eq!(media.segments.len(), 3);
        assert_eq!(
            media.segments[0].uri.as_str(),
            "https://cdn.example.com/vod/asset/video/seg1.m4s"
        );
        assert!((media.duration() - 10.5).abs() < 1e-6);
        assert_eq!(
            media.init_segments,
            vec![Url::parse("https://cdn.example.com/vod/asset/video/init.mp4").unwrap()]
        );
        assert_eq!(
            media.keys,
            vec![Url::parse("https://keys.example.com/k1").unwrap()]
        );
    }
}
