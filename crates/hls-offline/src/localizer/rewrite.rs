//! Offline manifest synthesis.
//!
//! Every remote reference of the selected manifest graph is replaced by its
//! content-addressed local path; all other directives are kept verbatim.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use url::Url;

use super::paths::{self, MASTER_PLAYLIST};
use crate::Result;
use crate::model::TrackType;
use crate::playlist::attributes::{attribute, remove_attribute, replace_uri};
use crate::playlist::{
    EXT_X_I_FRAME_STREAM_INF, EXT_X_MAP, EXT_X_MEDIA, EXT_X_STREAM_INF, downloadable_key_uri,
    resolve,
};

/// Original text of one selected media playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMediaPlaylist {
    pub url: Url,
    pub track_type: TrackType,
    pub text: String,
}

/// Snapshot of the selected manifest graph, persisted with the item so the
/// local tree can be written once every resource is on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedManifests {
    pub master_url: Url,
    pub master_text: String,
    pub variant_url: Url,
    pub variant_bandwidth: u64,
    /// Selected video playlist first, then audio, then text.
    pub media: Vec<LocalMediaPlaylist>,
}

impl LocalizedManifests {
    fn selected_track(&self, url: &Url) -> Option<TrackType> {
        self.media
            .iter()
            .find(|m| &m.url == url && m.track_type != TrackType::Video)
            .map(|m| m.track_type)
    }

    /// Master playlist reduced to the selected variant and renditions.
    pub fn localize_master(&self) -> Result<String> {
        let base = &self.master_url;
        let mut lines: Vec<String> = Vec::new();
        let mut kept_groups: HashSet<String> = HashSet::new();
        let mut pending_variant: Option<&str> = None;

        for line in self.master_text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with(EXT_X_I_FRAME_STREAM_INF) {
                continue;
            }

            if line.starts_with(EXT_X_STREAM_INF) {
                pending_variant = Some(line);
                continue;
            }

            if line.starts_with(EXT_X_MEDIA) {
                let Some(uri) = attribute(line, "URI") else {
                    if let Some(group) = attribute(line, "GROUP-ID") {
                        kept_groups.insert(group.to_owned());
                    }
                    lines.push(line.to_owned());
                    continue;
                };
                let url = resolve(base, uri)?;
                let Some(track_type) = self.selected_track(&url) else {
                    continue;
                };
                if let Some(group) = attribute(line, "GROUP-ID") {
                    kept_groups.insert(group.to_owned());
                }
                let local = paths::playlist_relative_uri(&url, track_type);
                lines.push(replace_uri(line, &local).unwrap_or_else(|| line.to_owned()));
                continue;
            }

            if line.starts_with('#') {
                lines.push(line.to_owned());
                continue;
            }

            // URI line: only meaningful after an EXT-X-STREAM-INF.
            let Some(stream_inf) = pending_variant.take() else {
                continue;
            };
            if resolve(base, line)? == self.variant_url {
                lines.push(stream_inf.to_owned());
                lines.push(paths::playlist_relative_uri(
                    &self.variant_url,
                    TrackType::Video,
                ));
            }
        }

        // Group references whose renditions were all dropped would leave the
        // variant pointing at nothing.
        let lines: Vec<String> = lines
            .into_iter()
            .map(|line| {
                if !line.starts_with(EXT_X_STREAM_INF) {
                    return line;
                }
                let mut line = line;
                for key in ["AUDIO", "SUBTITLES"] {
                    if attribute(&line, key).is_some_and(|g| !kept_groups.contains(g)) {
                        line = remove_attribute(&line, key);
                    }
                }
                line
            })
            .collect();

        Ok(lines.join("\n") + "\n")
    }

    /// Saves the local manifest tree under `item_root`.
    pub async fn save_local_files(&self, item_root: &Path) -> Result<()> {
        let master = self.localize_master()?;
        fs::create_dir_all(item_root).await?;

        for playlist in &self.media {
            let dir = item_root.join(playlist.track_type.as_str());
            fs::create_dir_all(&dir).await?;
            let target = dir.join(paths::playlist_file_name(&playlist.url));
            fs::write(&target, localize_media(playlist)?).await?;
            debug!(path = %target.display(), "Wrote local media playlist");
        }

        fs::write(item_root.join(MASTER_PLAYLIST), master).await?;
        Ok(())
    }
}

/// Media playlist with segments, init segments and keys pointing at local files.
pub fn localize_media(playlist: &LocalMediaPlaylist) -> Result<String> {
    let base = &playlist.url;
    let mut lines: Vec<String> = Vec::new();

    for line in playlist.text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        if !line.starts_with('#') {
            lines.push(paths::file_name(&resolve(base, line)?));
            continue;
        }

        if line.starts_with(EXT_X_MAP)
            && let Some(uri) = attribute(line, "URI")
        {
            let local = paths::file_name(&resolve(base, uri)?);
            lines.push(replace_uri(line, &local).unwrap_or_else(|| line.to_owned()));
            continue;
        }

        if let Some(uri) = downloadable_key_uri(line) {
            let local = format!(
                "../{}/{}",
                TrackType::Key.as_str(),
                paths::file_name(&resolve(base, uri)?)
            );
            lines.push(replace_uri(line, &local).unwrap_or_else(|| line.to_owned()));
            continue;
        }

        lines.push(line.to_owned());
    }

    Ok(lines.join("\n") + "\n")
}
