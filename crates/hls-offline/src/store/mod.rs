//! Persistence of items, their pending tasks and manifest snapshots.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::Result;
use crate::localizer::LocalizedManifests;
use crate::model::{DownloadItem, DownloadTask, ItemState, TaskKey};

/// Durable storage for items and tasks.
///
/// Implementations must tolerate concurrent calls for different items and
/// keep each call atomic. A task is identified by its item id, content URL
/// and track type; only pending tasks are stored.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Fails when an item with the same id exists.
    async fn insert_item(&self, item: &DownloadItem) -> Result<()>;

    async fn item(&self, id: &str) -> Result<Option<DownloadItem>>;

    async fn items_in_states(&self, states: &[ItemState]) -> Result<Vec<DownloadItem>>;

    /// Overwrites the item's fields (not its tasks or manifests).
    async fn update_item(&self, item: &DownloadItem) -> Result<()>;

    async fn update_state(&self, id: &str, state: ItemState) -> Result<DownloadItem>;

    /// Adds `bytes` written for `task` to the task's counted bytes and to the
    /// item's downloaded size, returning the updated item.
    async fn increment_downloaded(&self, task: &TaskKey, bytes: u64) -> Result<DownloadItem>;

    /// A transfer of `task` restarted at `offset`: bytes counted for the task
    /// beyond the offset are taken back from the item's downloaded size.
    async fn rewind_task(&self, task: &TaskKey, offset: u64) -> Result<DownloadItem>;

    /// Removes the item together with its tasks and manifests.
    async fn remove_item(&self, id: &str) -> Result<()>;

    /// Stores the item fields, replaces its task list and stores the manifest
    /// snapshot, all or nothing.
    async fn save_metadata(
        &self,
        item: &DownloadItem,
        tasks: &[DownloadTask],
        manifests: &LocalizedManifests,
    ) -> Result<()>;

    /// Pending tasks ordered by their position within their playlist.
    async fn tasks(&self, item_id: &str) -> Result<Vec<DownloadTask>>;

    /// Removes a finished task and counts it as completed. Completing a task
    /// that is no longer stored leaves the count untouched.
    async fn complete_task(&self, task: &DownloadTask) -> Result<DownloadItem>;

    /// Stores the resume data carried by `tasks` on their stored counterparts.
    async fn save_resume_tokens(&self, tasks: &[DownloadTask]) -> Result<()>;

    async fn remove_tasks(&self, item_id: &str) -> Result<()>;

    async fn manifests(&self, item_id: &str) -> Result<Option<LocalizedManifests>>;
}
