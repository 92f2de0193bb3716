//! Deterministic local layout of an item:
//! `items/<safe-id>/<track-type>/<sha256(url)>.<ext>` plus `master.m3u8` at the item root.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

use crate::model::TrackType;

pub const MASTER_PLAYLIST: &str = "master.m3u8";

const PLAYLIST_EXTENSION: &str = "m3u8";

/// Lowercase hex SHA-256 of the absolute URL.
pub fn url_hash(url: &Url) -> String {
    hex::encode(Sha256::digest(url.as_str().as_bytes()))
}

/// Extension of the last path segment, if it has a usable one.
pub fn url_extension(url: &Url) -> Option<&str> {
    let segment = url.path_segments()?.last()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

/// `<hash>.<ext>`, or just `<hash>` when the URL has no extension.
pub fn file_name(url: &Url) -> String {
    let hash = url_hash(url);
    match url_extension(url) {
        Some(ext) => format!("{hash}.{ext}"),
        None => hash,
    }
}

/// `<track-type>/<hash>.<ext>`, relative to the item root.
pub fn relative_path(url: &Url, track_type: TrackType) -> PathBuf {
    Path::new(track_type.as_str()).join(file_name(url))
}

/// Local name of a media playlist; always carries the playlist extension.
pub fn playlist_file_name(url: &Url) -> String {
    format!("{}.{PLAYLIST_EXTENSION}", url_hash(url))
}

/// `<track-type>/<hash>.m3u8`, as referenced from the local master playlist.
pub fn playlist_relative_uri(url: &Url, track_type: TrackType) -> String {
    format!("{}/{}", track_type.as_str(), playlist_file_name(url))
}

/// Item ids are percent-encoded so they cannot escape the items directory.
/// Dots are unreserved, so `.` and `..` are encoded by hand.
pub fn safe_item_id(id: &str) -> String {
    match id {
        "" => "%00".to_owned(),
        "." | ".." => id.replace('.', "%2E"),
        _ => urlencoding::encode(id).into_owned(),
    }
}

pub fn item_root(items_dir: &Path, item_id: &str) -> PathBuf {
    items_dir.join(safe_item_id(item_id))
}

/// Absolute destination of a resource.
pub fn task_destination(item_root: &Path, url: &Url, track_type: TrackType) -> PathBuf {
    item_root.join(relative_path(url, track_type))
}
