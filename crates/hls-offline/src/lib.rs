//! Offline HLS downloads.
//!
//! Loading an item parses its multi-variant playlist, selects one video
//! variant plus audio and subtitle renditions, and turns every segment, init
//! segment and key into a download task with a content-addressed local path.
//! The download engine runs those tasks with bounded concurrency and can be
//! paused and resumed; once everything is on disk the playlists are rewritten
//! so the item plays without network access.
//!
//! [`ContentManager`] is the entry point that ties these pieces together.

pub mod config;
pub mod disk;
pub mod engine;
pub mod error;
pub mod localizer;
pub mod manager;
pub mod model;
pub mod playlist;
pub mod queue;
pub mod selection;
pub mod store;
pub mod transport;

// Export common types for ease of use
pub use config::{OfflineConfig, QueueConfig};
pub use engine::{DownloadEngine, EngineEvent, EngineState};
pub use error::{Error, Result, TransferError};
pub use localizer::{HlsLocalizer, LocalizedManifests, LocalizedMetadata};
pub use manager::{ContentManager, ContentManagerBuilder, ItemEvent};
pub use model::{
    DownloadItem, DownloadTask, ItemState, ResumeToken, TaskKey, TrackInfo, TrackType,
};
pub use queue::WorkQueue;
pub use selection::{Codec, CodecSupport, SelectionOptions, StreamSelector};
pub use store::{ItemStore, MemoryStore, SqliteStore};
pub use transport::{HttpTransport, Transport};
