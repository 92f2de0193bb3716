//! Manifest localizer: parsing, selection, task generation and size estimation.

pub mod paths;
mod rewrite;

pub use rewrite::{LocalMediaPlaylist, LocalizedManifests, localize_media};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, info};
use url::Url;

use crate::config::OfflineConfig;
use crate::model::{DownloadItem, DownloadTask, TrackInfo, TrackType};
use crate::playlist::{M3u8Parser, ManifestParser, MasterManifest, MediaManifest, RenditionKind};
use crate::selection::StreamSelector;
use crate::transport::Transport;
use crate::{Error, Result};

/// Everything [`HlsLocalizer::load_metadata`] derives for one item.
#[derive(Debug, Clone)]
pub struct LocalizedMetadata {
    /// Seconds, summed over the selected video playlist.
    pub duration: f64,
    pub estimated_size: u64,
    pub tasks: Vec<DownloadTask>,
    pub available_audio_tracks: Vec<TrackInfo>,
    pub available_text_tracks: Vec<TrackInfo>,
    pub selected_audio_tracks: Vec<TrackInfo>,
    pub selected_text_tracks: Vec<TrackInfo>,
    pub manifests: LocalizedManifests,
}

impl LocalizedMetadata {
    /// Copies the derived fields onto `item`, resetting its progress.
    pub fn apply_to(&self, item: &mut DownloadItem) {
        item.duration = Some(self.duration);
        item.estimated_size = Some(self.estimated_size);
        item.downloaded_size = 0;
        item.total_task_count = Some(self.tasks.len() as u64);
        item.completed_task_count = Some(0);
        item.available_audio_tracks = self.available_audio_tracks.clone();
        item.available_text_tracks = self.available_text_tracks.clone();
        item.selected_audio_tracks = self.selected_audio_tracks.clone();
        item.selected_text_tracks = self.selected_text_tracks.clone();
        item.touch();
    }
}

/// One selected stream to fetch the media playlist of.
struct SelectedStream<'a> {
    track_type: TrackType,
    url: &'a Url,
    /// Declared bandwidth; text streams do not count towards the estimate.
    bandwidth: Option<u64>,
}

pub struct HlsLocalizer {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn ManifestParser>,
    items_dir: PathBuf,
    fetch_timeout: Duration,
    audio_bitrate_estimation: u64,
}

impl HlsLocalizer {
    pub fn new(transport: Arc<dyn Transport>, config: &OfflineConfig) -> Self {
        Self {
            transport,
            parser: Arc::new(M3u8Parser::new()),
            items_dir: config.items_dir(),
            fetch_timeout: config.manifest_fetch_timeout,
            audio_bitrate_estimation: config.audio_bitrate_estimation,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Fetches a manifest, giving up after the configured timeout whether or
    /// not the transport enforces it.
    async fn fetch(&self, url: &Url) -> Result<String> {
        debug!(url = %url, "Fetching manifest");
        tokio::time::timeout(
            self.fetch_timeout,
            self.transport.fetch_text(url, self.fetch_timeout),
        )
        .await
        .map_err(|_| Error::NetworkTimeout {
            url: url.to_string(),
        })?
    }

    async fn load_media(&self, url: &Url) -> Result<MediaManifest> {
        let text = self.fetch(url).await?;
        self.parser.parse_media(&text, url)
    }

    /// Fetches and parses the manifest graph of `master_url`, selects streams
    /// with `selector` and derives the download tasks.
    ///
    /// Any fetch or parse failure aborts the whole operation.
    pub async fn load_metadata(
        &self,
        item_id: &str,
        master_url: &Url,
        selector: &StreamSelector,
    ) -> Result<LocalizedMetadata> {
        let master_text = self.fetch(master_url).await?;
        let master = self.parser.parse_master(&master_text, master_url)?;
        let selection = selector.select(&master)?;

        let mut streams = vec![SelectedStream {
            track_type: TrackType::Video,
            url: &selection.video.uri,
            bandwidth: Some(selection.video.bandwidth),
        }];
        for rendition in selection.audio.iter().chain(&selection.text) {
            let track_type = track_type_of(rendition.kind)?;
            let Some(url) = rendition.uri.as_ref() else {
                continue;
            };
            let bandwidth = match track_type {
                TrackType::Audio => Some(rendition.bandwidth.unwrap_or(self.audio_bitrate_estimation)),
                _ => None,
            };
            streams.push(SelectedStream {
                track_type,
                url,
                bandwidth,
            });
        }

        let playlists = try_join_all(streams.iter().map(|s| self.load_media(s.url))).await?;

        let duration = playlists.first().map(MediaManifest::duration).unwrap_or(0.0);
        let estimated_size = streams
            .iter()
            .filter_map(|s| s.bandwidth)
            .map(|bandwidth| (bandwidth as f64 * duration / 8.0) as u64)
            .sum();

        let item_root = paths::item_root(&self.items_dir, item_id);
        let mut builder = TaskBuilder::new(item_id, &item_root);
        for (stream, media) in streams.iter().zip(&playlists) {
            builder.add_playlist(stream.track_type, media);
        }
        let tasks = builder.finish();

        let manifests = LocalizedManifests {
            master_url: master_url.clone(),
            master_text,
            variant_url: selection.video.uri.clone(),
            variant_bandwidth: selection.video.bandwidth,
            media: streams
                .iter()
                .zip(&playlists)
                .map(|(stream, media)| LocalMediaPlaylist {
                    url: stream.url.clone(),
                    track_type: stream.track_type,
                    text: media.text.clone(),
                })
                .collect(),
        };

        let (available_audio_tracks, available_text_tracks) = available_tracks(&master);

        info!(
            item_id,
            tasks = tasks.len(),
            duration,
            estimated_size,
            "Loaded item metadata"
        );

        Ok(LocalizedMetadata {
            duration,
            estimated_size,
            tasks,
            available_audio_tracks,
            available_text_tracks,
            selected_audio_tracks: dedup_tracks(
                selection
                    .audio
                    .iter()
                    .map(|r| TrackInfo::audio(r.language.clone(), r.name.clone())),
            ),
            selected_text_tracks: dedup_tracks(
                selection
                    .text
                    .iter()
                    .map(|r| TrackInfo::text(r.language.clone(), r.name.clone())),
            ),
            manifests,
        })
    }
}

fn track_type_of(kind: RenditionKind) -> Result<TrackType> {
    match kind {
        RenditionKind::Audio => Ok(TrackType::Audio),
        RenditionKind::Subtitles => Ok(TrackType::Text),
        other => Err(Error::UnknownPlaylistType {
            kind: format!("{other:?}"),
        }),
    }
}

fn dedup_tracks(tracks: impl Iterator<Item = TrackInfo>) -> Vec<TrackInfo> {
    let mut seen = HashSet::new();
    tracks.filter(|t| seen.insert(t.clone())).collect()
}

fn available_tracks(master: &MasterManifest) -> (Vec<TrackInfo>, Vec<TrackInfo>) {
    let audio = master
        .renditions
        .iter()
        .filter(|r| r.kind == RenditionKind::Audio)
        .map(|r| TrackInfo::audio(r.language.clone(), r.name.clone()));
    let text = master
        .renditions
        .iter()
        .filter(|r| r.kind == RenditionKind::Subtitles)
        .map(|r| TrackInfo::text(r.language.clone(), r.name.clone()));
    (dedup_tracks(audio), dedup_tracks(text))
}

/// Collects tasks, keeping one task per destination.
struct TaskBuilder<'a> {
    item_id: &'a str,
    item_root: &'a Path,
    tasks: Vec<DownloadTask>,
    destinations: HashSet<PathBuf>,
}

impl<'a> TaskBuilder<'a> {
    fn new(item_id: &'a str, item_root: &'a Path) -> Self {
        Self {
            item_id,
            item_root,
            tasks: Vec::new(),
            destinations: HashSet::new(),
        }
    }

    fn push(&mut self, url: &Url, track_type: TrackType, order: u32) {
        let destination = paths::task_destination(self.item_root, url, track_type);
        if !self.destinations.insert(destination.clone()) {
            return;
        }
        self.tasks.push(DownloadTask {
            item_id: self.item_id.to_owned(),
            content_url: url.clone(),
            track_type,
            destination,
            order,
            resume_data: None,
            downloaded_bytes: 0,
        });
    }

    /// Keys and init segments come first with order 0; segments follow from 1.
    fn add_playlist(&mut self, track_type: TrackType, media: &MediaManifest) {
        for key in &media.keys {
            self.push(key, TrackType::Key, 0);
        }
        for init in &media.init_segments {
            self.push(init, track_type, 0);
        }
        for (idx, segment) in media.segments.iter().enumerate() {
            self.push(&segment.uri, track_type, idx as u32 + 1);
        }
    }

    fn finish(self) -> Vec<DownloadTask> {
        self.tasks
    }
}
