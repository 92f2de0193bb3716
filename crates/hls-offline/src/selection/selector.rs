use tracing::debug;

use super::codec::full_priority;
use super::{Codec, CodecSupport, SelectionOptions};
use crate::playlist::{MasterManifest, Rendition, RenditionKind, VariantStream};
use crate::{Error, Result};

/// Streams picked for one item.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub video: &'a VariantStream,
    pub audio: Vec<&'a Rendition>,
    pub text: Vec<&'a Rendition>,
}

/// Deterministic rendition picker.
#[derive(Debug, Clone, Default)]
pub struct StreamSelector {
    options: SelectionOptions,
    support: CodecSupport,
}

impl StreamSelector {
    pub fn new(options: SelectionOptions, support: CodecSupport) -> Self {
        Self { options, support }
    }

    pub fn options(&self) -> &SelectionOptions {
        &self.options
    }

    /// Picks one video variant plus the audio and text renditions of its groups.
    ///
    /// Fails only when no variant is playable on this host at all.
    pub fn select<'a>(&self, master: &'a MasterManifest) -> Result<Selection<'a>> {
        let video = self
            .select_video(&master.variants)
            .ok_or_else(|| Error::malformed(&master.url, "no playable variant stream"))?;

        let audio = select_renditions(
            &master.renditions,
            RenditionKind::Audio,
            video.audio_group.as_deref(),
            self.options.all_audio_languages,
            &self.options.audio_languages,
        );
        let text = select_renditions(
            &master.renditions,
            RenditionKind::Subtitles,
            video.subtitle_group.as_deref(),
            self.options.all_text_languages,
            &self.options.text_languages,
        );

        debug!(
            video = %video.uri,
            bandwidth = video.bandwidth,
            audio = audio.len(),
            text = text.len(),
            "Selected streams"
        );

        Ok(Selection { video, audio, text })
    }

    /// Picks one variant, or `None` when `variants` holds nothing playable.
    ///
    /// Variants are grouped by video codec and each group is ordered by audio
    /// codec priority, then ascending bandwidth. The per-codec minimum bitrate,
    /// the preferred width and the preferred height then narrow each group in
    /// turn. The first stream of the highest-priority non-empty group wins.
    pub fn select_video<'a>(&self, variants: &'a [VariantStream]) -> Option<&'a VariantStream> {
        let allow_inefficient = self.options.allow_inefficient_codecs;
        let video_order = full_priority(
            &self.options.video_codecs,
            &Codec::DEFAULT_VIDEO_ORDER,
            &self.support,
            allow_inefficient,
        );
        let audio_order = full_priority(
            &self.options.audio_codecs,
            &Codec::DEFAULT_AUDIO_ORDER,
            &self.support,
            allow_inefficient,
        );

        let mut groups: Vec<(Codec, Vec<&'a VariantStream>)> =
            video_order.iter().map(|c| (*c, Vec::new())).collect();

        for variant in variants {
            if !self.audio_playable(variant) {
                continue;
            }
            let Some(codec) = video_codec(variant) else {
                continue;
            };
            if let Some((_, group)) = groups.iter_mut().find(|(c, _)| *c == codec) {
                group.push(variant);
            }
        }

        for (codec, group) in &mut groups {
            // `sort_by` is stable: equal streams keep manifest order.
            group.sort_by(|a, b| {
                audio_rank(a, &audio_order)
                    .cmp(&audio_rank(b, &audio_order))
                    .then(a.bandwidth.cmp(&b.bandwidth))
            });
            let mut ranked: Vec<Ranked<'a>> = group.drain(..).enumerate().collect();

            if let Some(&min_bitrate) = self.options.video_bitrates.get(&*codec) {
                narrow(&mut ranked, |s| s.bandwidth, min_bitrate);
            }
            if let Some(width) = self.options.video_width {
                narrow(&mut ranked, VariantStream::width, width);
            }
            if let Some(height) = self.options.video_height {
                narrow(&mut ranked, VariantStream::height, height);
            }
            group.extend(ranked.into_iter().map(|(_, s)| s));
        }

        groups
            .into_iter()
            .find_map(|(_, group)| group.first().copied())
    }

    fn audio_playable(&self, variant: &VariantStream) -> bool {
        !(variant.has_codec(Codec::Ac3.tag()) && !self.support.ac3
            || variant.has_codec(Codec::Eac3.tag()) && !self.support.ec3)
    }
}

/// Variants without a `CODECS` attribute are assumed to be AVC.
fn video_codec(variant: &VariantStream) -> Option<Codec> {
    if variant.codecs.is_empty() || variant.has_codec("avc1") || variant.has_codec("avc3") {
        Some(Codec::Avc1)
    } else if variant.has_codec("hvc1") || variant.has_codec("hev1") {
        Some(Codec::Hevc)
    } else {
        None
    }
}

/// Position of the variant's best audio codec in `order` (lower is better).
fn audio_rank(variant: &VariantStream, order: &[Codec]) -> usize {
    order
        .iter()
        .position(|c| variant.has_codec(c.tag()))
        .unwrap_or(usize::MAX)
}

/// A candidate with its position in the codec/bandwidth order.
type Ranked<'a> = (usize, &'a VariantStream);

/// Keeps the candidates whose `key` is at least `threshold`, ordered by `key`
/// and then by rank. When none qualifies, keeps those sharing the highest `key`.
fn narrow(candidates: &mut Vec<Ranked<'_>>, key: impl Fn(&VariantStream) -> u64, threshold: u64) {
    if candidates.len() < 2 {
        return;
    }
    candidates.sort_by_key(|&(rank, s)| (key(s), rank));
    let Some(highest) = candidates.last().map(|&(_, s)| key(s)) else {
        return;
    };
    let floor = threshold.min(highest);
    candidates.retain(|&(_, s)| key(s) >= floor);
}

fn canonical_language(code: &str) -> String {
    code.trim().replace('_', "-").to_ascii_lowercase()
}

/// Renditions of `kind` in the selected variant's group, filtered by language.
///
/// Requested languages that are absent are skipped silently, as are
/// renditions without a URI (muxed into the variant).
fn select_renditions<'a>(
    renditions: &'a [Rendition],
    kind: RenditionKind,
    group: Option<&str>,
    all_languages: bool,
    languages: &[String],
) -> Vec<&'a Rendition> {
    let wanted: Vec<String> = languages.iter().map(|l| canonical_language(l)).collect();

    let mut selected: Vec<&'a Rendition> = Vec::new();
    for rendition in renditions {
        if rendition.kind != kind || rendition.uri.is_none() {
            continue;
        }
        if group.is_some_and(|g| rendition.group_id != g) {
            continue;
        }
        let language_matches = rendition
            .language
            .as_deref()
            .is_some_and(|l| wanted.contains(&canonical_language(l)));
        if !all_languages && !language_matches {
            continue;
        }
        if selected.iter().any(|s| s.uri == rendition.uri) {
            continue;
        }
        selected.push(rendition);
    }
    selected
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use url::Url;

    use super::*;
    use crate::playlist::Resolution;

    fn create_test_variant(bandwidth: u64, width: u64, height: u64, codecs: &str) -> VariantStream {
        VariantStream {
            uri: Url::parse(&format!("https://cdn.example.com/{bandwidth}_{width}.m3u8"))
                .unwrap(),
            bandwidth,
            resolution: Some(Resolution { width, height }),
            codecs: codecs.split(',').map(str::to_owned).collect(),
            audio_group: Some("aud".into()),
            subtitle_group: Some("sub".into()),
        }
    }

    fn create_test_rendition(kind: RenditionKind, group: &str, lang: Option<&str>) -> Rendition {
        Rendition {
            kind,
            uri: Some(
                Url::parse(&format!(
                    "https://cdn.example.com/{group}/{}.m3u8",
                    lang.unwrap_or("und")
                ))
                .unwrap(),
            ),
            group_id: group.to_owned(),
            language: lang.map(str::to_owned),
            name: lang.unwrap_or("Unknown").to_owned(),
            is_default: false,
            bandwidth: None,
        }
    }

    fn avc_ladder() -> Vec<VariantStream> {
        vec![
            create_test_variant(1_500_000, 1920, 1080, "avc1.640028,mp4a.40.2"),
            create_test_variant(488_448, 640, 360, "avc1.42c01e,mp4a.40.2"),
            create_test_variant(900_000, 1280, 720, "avc1.4d401f,mp4a.40.2"),
        ]
    }

    fn selector(options: SelectionOptions) -> StreamSelector {
        StreamSelector::new(options, CodecSupport::default())
    }

    #[test]
    fn test_select_video_empty() {
        assert!(selector(SelectionOptions::new()).select_video(&[]).is_none());
    }

    #[test]
    fn test_select_video_defaults_to_lowest_bandwidth() {
        let variants = avc_ladder();
        let chosen = selector(SelectionOptions::new())
            .select_video(&variants)
            .unwrap();
        assert_eq!(chosen.bandwidth, 488_448);
    }

    #[rstest]
    #[case(900_000, 900_000)]
    #[case(600_000, 900_000)]
    #[case(1_500_000, 1_500_000)]
    #[case(100, 488_448)]
    #[case(5_000_000, 1_500_000)]
    fn test_select_video_min_bitrate(#[case] min_bitrate: u64, #[case] expected: u64) {
        let variants = avc_ladder();
        let options = SelectionOptions::new().with_video_bitrate(Codec::Avc1, min_bitrate);
        let chosen = selector(options).select_video(&variants).unwrap();
        assert_eq!(chosen.bandwidth, expected);
    }

    #[rstest]
    #[case(Some(900), None, 1280)]
    #[case(Some(4000), None, 1920)]
    #[case(None, Some(720), 1280)]
    #[case(None, Some(2160), 1920)]
    #[case(Some(100), Some(100), 640)]
    fn test_select_video_resolution(
        #[case] width: Option<u64>,
        #[case] height: Option<u64>,
        #[case] expected_width: u64,
    ) {
        let variants = avc_ladder();
        let mut options = SelectionOptions::new();
        options.video_width = width;
        options.video_height = height;
        let chosen = selector(options).select_video(&variants).unwrap();
        assert_eq!(chosen.width(), expected_width);
    }

    #[test]
    fn test_select_video_width_and_bitrate_combined() {
        let variants = avc_ladder();
        let options = SelectionOptions::new()
            .with_video_width(900)
            .with_video_bitrate(Codec::Avc1, 900_000);
        let chosen = selector(options).select_video(&variants).unwrap();
        assert_eq!(chosen.bandwidth, 900_000);
        assert_eq!(chosen.height(), 720);
    }

    #[test]
    fn test_constraint_ties_keep_audio_priority() {
        let variants = vec![
            create_test_variant(500_000, 1280, 720, "avc1.4d401f,mp4a.40.2"),
            create_test_variant(900_000, 1280, 720, "avc1.4d401f,ec-3"),
        ];
        let options = SelectionOptions::new()
            .with_video_bitrate(Codec::Avc1, 400_000)
            .with_video_width(1280);
        let chosen = StreamSelector::new(options, CodecSupport::all())
            .select_video(&variants)
            .unwrap();
        assert!(chosen.has_codec("ec-3"));
    }

    #[test]
    fn test_select_video_never_empty() {
        let variants = avc_ladder();
        for bitrate in [0, 1, 500_000, 10_000_000, u64::MAX] {
            for width in [0, 700, 100_000] {
                for height in [0, 400, 100_000] {
                    let options = SelectionOptions::new()
                        .with_video_bitrate(Codec::Avc1, bitrate)
                        .with_video_width(width)
                        .with_video_height(height);
                    assert!(selector(options).select_video(&variants).is_some());
                }
            }
        }
    }

    #[test]
    fn test_select_video_prefers_hevc_when_supported() {
        let mut variants = avc_ladder();
        variants.push(create_test_variant(700_000, 1280, 720, "hvc1.1.6.L93.B0,mp4a.40.2"));

        let hardware = CodecSupport {
            hardware_hevc: true,
            ..Default::default()
        };
        let chosen = StreamSelector::new(SelectionOptions::new(), hardware)
            .select_video(&variants)
            .unwrap();
        assert!(chosen.has_codec("hvc1"));

        // Explicit preference wins over the default order.
        let options = SelectionOptions::new().with_video_codecs([Codec::Avc1]);
        let chosen = StreamSelector::new(options, hardware)
            .select_video(&variants)
            .unwrap();
        assert!(chosen.has_codec("avc1"));
    }

    #[test]
    fn test_select_video_software_hevc_needs_opt_in() {
        let variants = vec![
            create_test_variant(700_000, 1280, 720, "hvc1.1.6.L93.B0"),
            create_test_variant(900_000, 1280, 720, "avc1.4d401f"),
        ];
        let software = CodecSupport {
            software_hevc: true,
            ..Default::default()
        };

        let chosen = StreamSelector::new(SelectionOptions::new(), software)
            .select_video(&variants)
            .unwrap();
        assert!(chosen.has_codec("avc1"));

        let options = SelectionOptions::new().with_allow_inefficient_codecs(true);
        let chosen = StreamSelector::new(options, software)
            .select_video(&variants)
            .unwrap();
        assert!(chosen.has_codec("hvc1"));
    }

    #[test]
    fn test_select_video_only_unsupported_hevc() {
        let variants = vec![create_test_variant(700_000, 1280, 720, "hvc1.1.6.L93.B0")];
        assert!(selector(SelectionOptions::new()).select_video(&variants).is_none());
    }

    #[test]
    fn test_select_video_skips_unplayable_audio() {
        let variants = vec![
            create_test_variant(400_000, 640, 360, "avc1.42c01e,ec-3"),
            create_test_variant(500_000, 640, 360, "avc1.42c01e,mp4a.40.2"),
        ];
        let chosen = selector(SelectionOptions::new())
            .select_video(&variants)
            .unwrap();
        assert_eq!(chosen.bandwidth, 500_000);

        let chosen = StreamSelector::new(SelectionOptions::new(), CodecSupport::all())
            .select_video(&variants)
            .unwrap();
        // E-AC-3 ranks ahead of AAC by default.
        assert_eq!(chosen.bandwidth, 400_000);
    }

    #[test]
    fn test_select_video_ties_keep_manifest_order() {
        let mut first = create_test_variant(800_000, 1280, 720, "avc1.4d401f");
        first.uri = Url::parse("https://cdn.example.com/first.m3u8").unwrap();
        let mut second = create_test_variant(800_000, 1280, 720, "avc1.4d401f");
        second.uri = Url::parse("https://cdn.example.com/second.m3u8").unwrap();
        let variants = vec![first, second];

        let chosen = selector(SelectionOptions::new().with_video_width(1280))
            .select_video(&variants)
            .unwrap();
        assert_eq!(chosen.uri.path(), "/first.m3u8");
    }

    #[test]
    fn test_select_video_missing_codecs_is_avc() {
        let mut variant = create_test_variant(300_000, 480, 270, "");
        variant.codecs.clear();
        let variants = vec![variant];
        assert!(selector(SelectionOptions::new()).select_video(&variants).is_some());
    }

    fn master_with_renditions() -> MasterManifest {
        MasterManifest {
            url: Url::parse("https://cdn.example.com/master.m3u8").unwrap(),
            text: String::new(),
            variants: avc_ladder(),
            renditions: vec![
                create_test_rendition(RenditionKind::Audio, "aud", Some("eng")),
                create_test_rendition(RenditionKind::Audio, "aud", Some("bul")),
                create_test_rendition(RenditionKind::Audio, "aud", Some("fin")),
                create_test_rendition(RenditionKind::Audio, "other", Some("heb")),
                create_test_rendition(RenditionKind::Audio, "aud", None),
                create_test_rendition(RenditionKind::Subtitles, "sub", Some("eng")),
            ],
        }
    }

    #[test]
    fn test_select_no_extra_tracks_by_default() {
        let master = master_with_renditions();
        let selection = selector(SelectionOptions::new()).select(&master).unwrap();
        assert!(selection.audio.is_empty());
        assert!(selection.text.is_empty());
    }

    #[test]
    fn test_select_languages_in_group() {
        let master = master_with_renditions();
        let options = SelectionOptions::new()
            .with_audio_languages(["BUL", "eng", "heb", "spa"])
            .with_text_languages(["eng"]);
        let selection = selector(options).select(&master).unwrap();

        let languages: Vec<_> = selection
            .audio
            .iter()
            .filter_map(|r| r.language.as_deref())
            .collect();
        // `heb` lives in another group, `spa` does not exist.
        assert_eq!(languages, vec!["eng", "bul"]);
        assert_eq!(selection.text.len(), 1);
    }

    #[test]
    fn test_select_all_languages_stays_in_group() {
        let master = master_with_renditions();
        let options = SelectionOptions::new().with_all_audio_languages();
        let selection = selector(options).select(&master).unwrap();
        assert_eq!(selection.audio.len(), 4);
        assert!(selection.audio.iter().all(|r| r.group_id == "aud"));
    }

    #[test]
    fn test_select_fails_without_playable_variant() {
        let mut master = master_with_renditions();
        master.variants = vec![create_test_variant(700_000, 1280, 720, "hvc1.1.6.L93.B0")];
        let err = selector(SelectionOptions::new()).select(&master).unwrap_err();
        assert!(matches!(err, Error::MalformedPlaylist { .. }));
    }
}
