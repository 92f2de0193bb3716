//! Persisted entities tying the localizer and the download engine together.

mod item;
mod task;
mod track;

pub use item::{DownloadItem, ItemState};
pub use task::{DownloadTask, ResumeToken, TaskKey};
pub use track::{TrackInfo, TrackType};
