//! The [`ContentManager`]: the one context object an application creates to
//! add, load, download, pause and remove items.
//!
//! Each running item owns a [`DownloadEngine`] whose events are consumed by a
//! spawned pump task (see `pump.rs`) that persists progress and drives the
//! item state machine.

mod events;
mod pump;

pub use events::ItemEvent;

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OfflineConfig;
use crate::disk::{self, DiskSpaceProbe, SpaceProbe};
use crate::engine::{DownloadEngine, EngineState};
use crate::localizer::HlsLocalizer;
use crate::localizer::paths::{self, MASTER_PLAYLIST};
use crate::model::{DownloadItem, ItemState};
use crate::playlist::ManifestParser;
use crate::selection::{CodecSupport, SelectionOptions, StreamSelector};
use crate::store::{ItemStore, MemoryStore};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) struct ManagerShared {
    config: OfflineConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ItemStore>,
    localizer: HlsLocalizer,
    codec_support: CodecSupport,
    space_probe: Arc<dyn SpaceProbe>,
    /// Engines of started items; paused engines stay until removed.
    engines: DashMap<String, DownloadEngine>,
    /// Ids whose metadata is being loaded.
    loading: DashSet<String>,
    event_tx: broadcast::Sender<ItemEvent>,
}

impl ManagerShared {
    fn emit(&self, event: ItemEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn item_root(&self, id: &str) -> PathBuf {
        paths::item_root(&self.config.items_dir(), id)
    }

    async fn require_item(&self, id: &str) -> Result<DownloadItem> {
        self.store
            .item(id)
            .await?
            .ok_or_else(|| Error::item_not_found(id))
    }

    async fn set_state(&self, id: &str, state: ItemState, error: Option<String>) -> Result<DownloadItem> {
        let item = self.store.update_state(id, state).await?;
        info!(item_id = %id, state = %state, "Item state changed");
        self.emit(ItemEvent::state(&item, error));
        Ok(item)
    }
}

/// Marks an id as loading for as long as it lives.
struct LoadingGuard<'a> {
    loading: &'a DashSet<String>,
    id: String,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(loading: &'a DashSet<String>, id: &str) -> Result<Self> {
        if !loading.insert(id.to_owned()) {
            return Err(Error::MetadataAlreadyLoading { id: id.to_owned() });
        }
        Ok(Self {
            loading,
            id: id.to_owned(),
        })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.remove(&self.id);
    }
}

/// Builder for [`ContentManager`].
///
/// Collaborators that are not supplied get their default implementation:
/// [`HttpTransport`], [`MemoryStore`], [`DiskSpaceProbe`] and a host without
/// optional codecs.
pub struct ContentManagerBuilder {
    config: OfflineConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn ItemStore>>,
    parser: Option<Arc<dyn ManifestParser>>,
    codec_support: CodecSupport,
    space_probe: Option<Arc<dyn SpaceProbe>>,
}

impl ContentManagerBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn codec_support(mut self, support: CodecSupport) -> Self {
        self.codec_support = support;
        self
    }

    pub fn space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = Some(probe);
        self
    }

    pub fn build(self) -> Result<ContentManager> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let mut localizer = HlsLocalizer::new(Arc::clone(&transport), &self.config);
        if let Some(parser) = self.parser {
            localizer = localizer.with_parser(parser);
        }
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        debug!(
            storage = %self.config.storage_path.display(),
            max_concurrent = self.config.max_concurrent_downloads,
            "Content manager created"
        );
        Ok(ContentManager {
            inner: Arc::new(ManagerShared {
                config: self.config,
                transport,
                store,
                localizer,
                codec_support: self.codec_support,
                space_probe: self
                    .space_probe
                    .unwrap_or_else(|| Arc::new(DiskSpaceProbe)),
                engines: DashMap::new(),
                loading: DashSet::new(),
                event_tx,
            }),
        })
    }
}

/// Entry point for offline downloads. Cloning shares the same manager.
#[derive(Clone)]
pub struct ContentManager {
    inner: Arc<ManagerShared>,
}

impl ContentManager {
    pub fn builder(config: OfflineConfig) -> ContentManagerBuilder {
        ContentManagerBuilder {
            config,
            transport: None,
            store: None,
            parser: None,
            codec_support: CodecSupport::default(),
            space_probe: None,
        }
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.inner.config
    }

    /// Receives every item event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Registers a new item for `url`.
    pub async fn add_item(&self, id: &str, url: &str) -> Result<DownloadItem> {
        let url = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;
        if let Some(existing) = self.inner.store.item(id).await? {
            return Err(Error::invalid_state("add an item with an existing id", existing.state));
        }

        let item = DownloadItem::new(id, url.as_str());
        self.inner.store.insert_item(&item).await?;
        info!(item_id = %id, url = %url, "Item added");
        self.inner.emit(ItemEvent::state(&item, None));
        Ok(item)
    }

    pub async fn item(&self, id: &str) -> Result<DownloadItem> {
        self.inner.require_item(id).await
    }

    /// Items whose state is one of `states`, oldest first.
    pub async fn items_by_state(&self, states: &[ItemState]) -> Result<Vec<DownloadItem>> {
        self.inner.store.items_in_states(states).await
    }

    /// Selects renditions for the item and creates its download tasks.
    ///
    /// Allowed for new items, and for loaded ones to select again. Nothing is
    /// persisted when loading fails.
    pub async fn load_item_metadata(&self, id: &str, options: SelectionOptions) -> Result<DownloadItem> {
        let _guard = LoadingGuard::acquire(&self.inner.loading, id)?;

        let mut item = self.inner.require_item(id).await?;
        if !matches!(item.state, ItemState::New | ItemState::MetadataLoaded) {
            return Err(Error::invalid_state("load metadata", item.state));
        }
        let url = Url::parse(&item.remote_url)
            .map_err(|e| Error::invalid_url(&item.remote_url, e.to_string()))?;

        let selector = StreamSelector::new(options, self.inner.codec_support);
        let metadata = self.inner.localizer.load_metadata(id, &url, &selector).await?;

        metadata.apply_to(&mut item);
        item.state = ItemState::MetadataLoaded;
        self.inner
            .store
            .save_metadata(&item, &metadata.tasks, &metadata.manifests)
            .await?;

        info!(
            item_id = %id,
            tasks = metadata.tasks.len(),
            estimated_size = metadata.estimated_size,
            duration = metadata.duration,
            "Metadata loaded"
        );
        self.inner.emit(ItemEvent::state(&item, None));
        Ok(item)
    }

    /// [`load_item_metadata`](Self::load_item_metadata) with a single
    /// preferred video bitrate.
    pub async fn load_item_metadata_with_bitrate(&self, id: &str, bitrate: u64) -> Result<DownloadItem> {
        self.load_item_metadata(id, SelectionOptions::with_preferred_bitrate(bitrate))
            .await
    }

    /// Starts (or resumes) downloading the item's remaining tasks.
    pub async fn start_item(&self, id: &str) -> Result<DownloadItem> {
        let shared = &self.inner;
        let item = shared.require_item(id).await?;
        if !item.state.is_startable() {
            return Err(Error::invalid_state("start item", item.state));
        }

        let required = shared
            .config
            .min_free_disk_space
            .saturating_add(item.remaining_estimate());
        disk::ensure_space(shared.space_probe.as_ref(), &shared.config.storage_path, required)?;

        let mut tasks = shared.store.tasks(id).await?;
        let task_count = tasks.len();

        // A paused engine is resumed; otherwise a new one gets its own pump.
        let (engine, fresh) = match shared.engines.entry(id.to_owned()) {
            Entry::Occupied(entry) => {
                let engine = entry.get().clone();
                if engine.state() != EngineState::Paused {
                    return Err(Error::invalid_state("start item", engine.state()));
                }
                (engine, false)
            }
            Entry::Vacant(entry) => {
                let (engine, events) = DownloadEngine::new(
                    id,
                    std::mem::take(&mut tasks),
                    Arc::clone(&shared.transport),
                    &shared.config,
                );
                entry.insert(engine.clone());
                tokio::spawn(pump::run(Arc::clone(shared), engine.clone(), events));
                (engine, true)
            }
        };

        let item = match shared.set_state(id, ItemState::InProgress, None).await {
            Ok(item) => item,
            Err(e) => {
                if fresh {
                    shared.engines.remove(id);
                    let _ = engine.cancel();
                }
                return Err(e);
            }
        };

        info!(item_id = %id, tasks = task_count, resumed = !fresh, "Starting item");
        if fresh {
            engine.start()?;
        } else {
            engine.resume(tasks)?;
        }
        Ok(item)
    }

    /// Starts every item in one of `states`, skipping the ones that fail.
    ///
    /// Returns the ids that were started.
    pub async fn start_items_in_states(&self, states: &[ItemState]) -> Result<Vec<String>> {
        let mut started = Vec::new();
        for item in self.inner.store.items_in_states(states).await? {
            match self.start_item(&item.id).await {
                Ok(_) => started.push(item.id),
                Err(e) => warn!(item_id = %item.id, error = %e, "Failed to start item"),
            }
        }
        Ok(started)
    }

    /// Stops the item's transfers, keeping their resume tokens.
    pub async fn pause_item(&self, id: &str) -> Result<DownloadItem> {
        let shared = &self.inner;
        let item = shared.require_item(id).await?;
        if item.state != ItemState::InProgress {
            return Err(Error::invalid_state("pause item", item.state));
        }

        let engine = shared.engines.get(id).map(|e| e.value().clone());
        if let Some(engine) = engine {
            let interrupted = engine.pause().await?;
            shared.store.save_resume_tokens(&interrupted).await?;
        }
        shared.set_state(id, ItemState::Paused, None).await
    }

    /// Stops any transfer and deletes the item, its tasks and its files.
    pub async fn remove_item(&self, id: &str) -> Result<()> {
        let shared = &self.inner;
        let mut item = shared.require_item(id).await?;

        let engine = shared.engines.remove(id).map(|(_, engine)| engine);
        if let Some(engine) = engine {
            // Wait for in-flight transfers so nothing writes into the
            // directory once it is gone.
            if let Err(e) = engine.pause().await {
                debug!(item_id = %id, error = %e, "Engine was not running");
            }
            if let Err(e) = engine.cancel() {
                debug!(item_id = %id, error = %e, "Engine already cancelled");
            }
        }

        shared.store.remove_tasks(id).await?;
        shared.store.remove_item(id).await?;

        let root = shared.item_root(id);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(item_id = %id, path = %root.display(), error = %e, "Failed to delete item files"),
        }

        info!(item_id = %id, "Item removed");
        item.state = ItemState::Removed;
        shared.emit(ItemEvent::state(&item, None));
        Ok(())
    }

    /// Local master playlist of a completed item.
    pub async fn item_playback_path(&self, id: &str) -> Result<PathBuf> {
        self.require_completed(id).await?;
        Ok(self.inner.item_root(id).join(MASTER_PLAYLIST))
    }

    /// URL of the item's master playlist on a server rooted at the items
    /// directory.
    ///
    /// `server_base` should end with `/`; otherwise its last segment is
    /// replaced.
    pub async fn item_playback_url(&self, id: &str, server_base: &Url) -> Result<Url> {
        self.require_completed(id).await?;
        let relative = format!("{}/{}", paths::safe_item_id(id), MASTER_PLAYLIST);
        server_base
            .join(&relative)
            .map_err(|e| Error::invalid_url(relative, e.to_string()))
    }

    /// Marks items left `inProgress` by an earlier process as `interrupted` so
    /// they can be started again.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
        let shared = &self.inner;
        let mut recovered = Vec::new();
        for item in shared.store.items_in_states(&[ItemState::InProgress]).await? {
            if shared.engines.contains_key(&item.id) {
                continue;
            }
            shared
                .set_state(&item.id, ItemState::Interrupted, Some("process exited".into()))
                .await?;
            recovered.push(item.id);
        }
        Ok(recovered)
    }

    /// Pauses every running item. Call before dropping the last handle.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = self.inner.engines.iter().map(|e| e.key().clone()).collect();
        info!(items = ids.len(), "Shutting down content manager");

        for id in ids {
            let item = match self.inner.require_item(&id).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(item_id = %id, error = %e, "Skipping unknown item");
                    continue;
                }
            };
            if item.state == ItemState::InProgress {
                self.pause_item(&id).await?;
            }
        }
        Ok(())
    }

    async fn require_completed(&self, id: &str) -> Result<DownloadItem> {
        let item = self.inner.require_item(id).await?;
        if item.state != ItemState::Completed {
            return Err(Error::invalid_state("play item", item.state));
        }
        Ok(item)
    }
}

impl std::fmt::Debug for ContentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentManager")
            .field("storage_path", &self.inner.config.storage_path)
            .field("running", &self.inner.engines.len())
            .finish()
    }
}
