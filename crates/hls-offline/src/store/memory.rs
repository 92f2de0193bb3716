use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::ItemStore;
use crate::localizer::LocalizedManifests;
use crate::model::{DownloadItem, DownloadTask, ItemState, TaskKey};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredItem {
    item: DownloadItem,
    tasks: Vec<DownloadTask>,
    manifests: Option<LocalizedManifests>,
}

fn same_task(a: &DownloadTask, b: &DownloadTask) -> bool {
    a.content_url == b.content_url && a.track_type == b.track_type
}

fn has_key(task: &DownloadTask, key: &TaskKey) -> bool {
    task.content_url == key.content_url && task.track_type == key.track_type
}

/// Non-durable [`ItemStore`], used by default and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, StoredItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_item<T>(&self, id: &str, f: impl FnOnce(&mut StoredItem) -> T) -> Result<T> {
        let mut items = self.items.write();
        let stored = items.get_mut(id).ok_or_else(|| Error::item_not_found(id))?;
        Ok(f(stored))
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_item(&self, item: &DownloadItem) -> Result<()> {
        let mut items = self.items.write();
        if items.contains_key(&item.id) {
            return Err(Error::storage(format!("item {} already exists", item.id)));
        }
        items.insert(
            item.id.clone(),
            StoredItem {
                item: item.clone(),
                tasks: Vec::new(),
                manifests: None,
            },
        );
        Ok(())
    }

    async fn item(&self, id: &str) -> Result<Option<DownloadItem>> {
        Ok(self.items.read().get(id).map(|s| s.item.clone()))
    }

    async fn items_in_states(&self, states: &[ItemState]) -> Result<Vec<DownloadItem>> {
        let mut items: Vec<DownloadItem> = self
            .items
            .read()
            .values()
            .filter(|s| states.contains(&s.item.state))
            .map(|s| s.item.clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update_item(&self, item: &DownloadItem) -> Result<()> {
        self.with_item(&item.id, |stored| stored.item = item.clone())
    }

    async fn update_state(&self, id: &str, state: ItemState) -> Result<DownloadItem> {
        self.with_item(id, |stored| {
            stored.item.state = state;
            stored.item.touch();
            stored.item.clone()
        })
    }

    async fn increment_downloaded(&self, task: &TaskKey, bytes: u64) -> Result<DownloadItem> {
        self.with_item(&task.item_id, |stored| {
            if let Some(t) = stored.tasks.iter_mut().find(|t| has_key(t, task)) {
                t.downloaded_bytes += bytes;
            }
            stored.item.downloaded_size += bytes;
            stored.item.touch();
            stored.item.clone()
        })
    }

    async fn rewind_task(&self, task: &TaskKey, offset: u64) -> Result<DownloadItem> {
        self.with_item(&task.item_id, |stored| {
            if let Some(t) = stored.tasks.iter_mut().find(|t| has_key(t, task))
                && t.downloaded_bytes > offset
            {
                let discarded = t.downloaded_bytes - offset;
                t.downloaded_bytes = offset;
                stored.item.downloaded_size = stored.item.downloaded_size.saturating_sub(discarded);
                stored.item.touch();
            }
            stored.item.clone()
        })
    }

    async fn remove_item(&self, id: &str) -> Result<()> {
        self.items.write().remove(id);
        Ok(())
    }

    async fn save_metadata(
        &self,
        item: &DownloadItem,
        tasks: &[DownloadTask],
        manifests: &LocalizedManifests,
    ) -> Result<()> {
        self.with_item(&item.id, |stored| {
            stored.item = item.clone();
            stored.tasks = tasks.to_vec();
            stored.manifests = Some(manifests.clone());
        })
    }

    async fn tasks(&self, item_id: &str) -> Result<Vec<DownloadTask>> {
        let mut tasks = self
            .items
            .read()
            .get(item_id)
            .map(|s| s.tasks.clone())
            .unwrap_or_default();
        // Stable: equal orders keep insertion order.
        tasks.sort_by_key(|t| t.order);
        Ok(tasks)
    }

    async fn complete_task(&self, task: &DownloadTask) -> Result<DownloadItem> {
        self.with_item(&task.item_id, |stored| {
            let before = stored.tasks.len();
            stored.tasks.retain(|t| !same_task(t, task));
            if stored.tasks.len() < before {
                stored.item.completed_task_count =
                    Some(stored.item.completed_task_count.unwrap_or(0) + 1);
            }
            stored.item.clone()
        })
    }

    async fn save_resume_tokens(&self, tasks: &[DownloadTask]) -> Result<()> {
        let mut items = self.items.write();
        for task in tasks {
            let Some(stored) = items.get_mut(&task.item_id) else {
                continue;
            };
            if let Some(existing) = stored.tasks.iter_mut().find(|t| same_task(t, task)) {
                existing.resume_data = task.resume_data.clone();
            }
        }
        Ok(())
    }

    async fn remove_tasks(&self, item_id: &str) -> Result<()> {
        if let Some(stored) = self.items.write().get_mut(item_id) {
            stored.tasks.clear();
        }
        Ok(())
    }

    async fn manifests(&self, item_id: &str) -> Result<Option<LocalizedManifests>> {
        Ok(self
            .items
            .read()
            .get(item_id)
            .and_then(|s| s.manifests.clone()))
    }
}
