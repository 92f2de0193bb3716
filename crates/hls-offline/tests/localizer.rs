mod common;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::{FixtureTransport, assert_close, config, fixture_url};
use hls_offline::localizer::{HlsLocalizer, LocalizedMetadata, localize_media};
use hls_offline::playlist::{M3u8Parser, ManifestParser};
use hls_offline::{Codec, CodecSupport, Error, SelectionOptions, StreamSelector, TrackInfo, TrackType};
use url::Url;

const T1_DURATION: f64 = 4.0 * 5.0 + 5.12;

async fn load(set: &str, options: SelectionOptions, support: CodecSupport) -> hls_offline::Result<LocalizedMetadata> {
    let storage = tempfile::tempdir().unwrap();
    let localizer = HlsLocalizer::new(FixtureTransport::new(), &config(storage.path()));
    let url = Url::parse(&fixture_url(set)).unwrap();
    localizer
        .load_metadata("item", &url, &StreamSelector::new(options, support))
        .await
}

fn count(metadata: &LocalizedMetadata, track_type: TrackType) -> usize {
    metadata
        .tasks
        .iter()
        .filter(|t| t.track_type == track_type)
        .count()
}

#[tokio::test]
async fn test_video_only_selection() {
    let metadata = load("t1", SelectionOptions::new(), CodecSupport::default())
        .await
        .unwrap();

    assert_eq!(metadata.tasks.len(), 6);
    assert_eq!(count(&metadata, TrackType::Video), 6);
    assert!((metadata.duration - T1_DURATION).abs() < 1e-3);
    assert!(metadata.manifests.variant_url.path().ends_with("/360p/index.m3u8"));
    assert_close(metadata.estimated_size, (488_448.0 * T1_DURATION / 8.0) as u64);

    assert_eq!(metadata.available_audio_tracks.len(), 4);
    assert_eq!(
        metadata.available_text_tracks,
        vec![TrackInfo::text(Some("eng".into()), "English")]
    );
    assert!(metadata.selected_audio_tracks.is_empty());
}

#[tokio::test]
async fn test_two_audio_languages_add_their_segments() {
    let video_only = load("t1", SelectionOptions::new(), CodecSupport::default())
        .await
        .unwrap();
    let metadata = load(
        "t1",
        SelectionOptions::new().with_audio_languages(["eng", "fin"]),
        CodecSupport::default(),
    )
    .await
    .unwrap();

    assert_eq!(metadata.tasks.len(), 6 + 2 * 6);
    assert_eq!(count(&metadata, TrackType::Audio), 12);
    assert_eq!(metadata.duration, video_only.duration);
    assert_eq!(
        metadata.selected_audio_tracks,
        vec![
            TrackInfo::audio(Some("eng".into()), "English"),
            TrackInfo::audio(Some("fin".into()), "Suomi"),
        ]
    );

    // Audio renditions without BANDWIDTH are estimated at 64 kbps.
    let audio = (64_000.0 * T1_DURATION / 8.0) as u64;
    assert_close(metadata.estimated_size, video_only.estimated_size + 2 * audio);
}

#[tokio::test]
async fn test_unknown_language_is_skipped() {
    let metadata = load(
        "t1",
        SelectionOptions::new().with_audio_languages(["deu", "heb"]),
        CodecSupport::default(),
    )
    .await
    .unwrap();
    assert_eq!(count(&metadata, TrackType::Audio), 6);
    assert_eq!(
        metadata.selected_audio_tracks,
        vec![TrackInfo::audio(Some("heb".into()), "Hebrew")]
    );
}

#[tokio::test]
async fn test_unreachable_preferences_fall_back_to_the_top_variant() {
    for options in [
        SelectionOptions::new().with_video_width(3840),
        SelectionOptions::new().with_video_bitrate(Codec::Avc1, 10_000_000),
        SelectionOptions::with_preferred_bitrate(10_000_000),
    ] {
        let metadata = load("t1", options, CodecSupport::default()).await.unwrap();
        assert!(metadata.manifests.variant_url.path().ends_with("/1080p/index.m3u8"));
        assert_eq!(metadata.manifests.variant_bandwidth, 1_500_000);
    }
}

#[tokio::test]
async fn test_minimum_bitrate_picks_lowest_qualifying_variant() {
    let metadata = load(
        "t1",
        SelectionOptions::new().with_video_bitrate(Codec::Avc1, 500_000),
        CodecSupport::default(),
    )
    .await
    .unwrap();
    assert_eq!(metadata.manifests.variant_bandwidth, 900_000);
}

#[tokio::test]
async fn test_fmp4_with_keys_and_subtitles() {
    let metadata = load(
        "t2",
        SelectionOptions::new()
            .with_all_audio_languages()
            .with_text_languages(["en"]),
        CodecSupport::default(),
    )
    .await
    .unwrap();

    assert!(metadata.manifests.variant_url.path().starts_with("/t2/avc/"));
    // One shared AES key; FairPlay keys are never fetched.
    assert_eq!(count(&metadata, TrackType::Key), 1);
    assert_eq!(count(&metadata, TrackType::Video), 1 + 3);
    assert_eq!(count(&metadata, TrackType::Audio), 2 * (1 + 3));
    assert_eq!(count(&metadata, TrackType::Text), 3);
    assert!(
        metadata
            .tasks
            .iter()
            .all(|t| t.content_url.scheme() == "https")
    );

    let destinations: HashSet<_> = metadata.tasks.iter().map(|t| &t.destination).collect();
    assert_eq!(destinations.len(), metadata.tasks.len());

    let video = metadata
        .manifests
        .media
        .iter()
        .find(|m| m.track_type == TrackType::Video)
        .unwrap();
    let local = localize_media(video).unwrap();
    assert!(local.contains("URI=\"../key/"));
    assert!(local.contains("skd://fixtures-asset-key"));
    assert!(!local.contains("https://"));
}

#[tokio::test]
async fn test_hevc_preferred_when_supported() {
    let metadata = load("t2", SelectionOptions::new(), CodecSupport::all())
        .await
        .unwrap();
    assert!(metadata.manifests.variant_url.path().starts_with("/t2/hevc/"));
    assert_eq!(metadata.manifests.variant_bandwidth, 1_400_000);
}

#[tokio::test]
async fn test_master_snapshot_keeps_only_the_selection() {
    let metadata = load(
        "t1",
        SelectionOptions::new().with_audio_languages(["eng"]),
        CodecSupport::default(),
    )
    .await
    .unwrap();
    let master = metadata.manifests.localize_master().unwrap();

    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 1);
    assert_eq!(master.matches("#EXT-X-MEDIA:").count(), 1);
    assert!(!master.contains("I-FRAME"));
    assert!(!master.contains("SUBTITLES="));
    assert!(!master.contains("Bulgarian"));

    let base = Url::parse("file:///offline/item/master.m3u8").unwrap();
    let parsed = M3u8Parser::new().parse_master(&master, &base).unwrap();
    assert_eq!(parsed.variants.len(), 1);
    assert_eq!(parsed.variants[0].bandwidth, 488_448);
    assert!(parsed.variants[0].uri.as_str().starts_with("file:///offline/item/video/"));
    assert!(
        parsed.renditions[0]
            .uri
            .as_ref()
            .unwrap()
            .as_str()
            .starts_with("file:///offline/item/audio/")
    );
}

#[tokio::test]
async fn test_load_failures() {
    let err = load("broken", SelectionOptions::new(), CodecSupport::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedPlaylist { .. }));

    let err = load("timeout", SelectionOptions::new(), CodecSupport::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NetworkTimeout { .. }));

    let err = load("missing", SelectionOptions::new(), CodecSupport::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transfer(_)));
}

#[tokio::test]
async fn test_slow_manifest_times_out() {
    let storage = tempfile::tempdir().unwrap();
    let transport = FixtureTransport::new();
    transport.set_manifest_delay(Duration::from_secs(3));
    let config = config(storage.path()).with_manifest_fetch_timeout(Duration::from_millis(100));
    let localizer = HlsLocalizer::new(transport, &config);
    let url = Url::parse(&fixture_url("t1")).unwrap();

    let started = Instant::now();
    let err = localizer
        .load_metadata(
            "item",
            &url,
            &StreamSelector::new(SelectionOptions::new(), CodecSupport::default()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NetworkTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}
