use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Local;
use hls_offline::localizer::{HlsLocalizer, LocalizedMetadata};
use hls_offline::{
    ContentManager, DownloadItem, Error, HttpTransport, ItemEvent, ItemState, SelectionOptions,
    SqliteStore, StreamSelector, TrackInfo, TrackType,
};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use url::Url;

use crate::cli::{Commands, SelectionArgs};
use crate::config::AppConfig;

const TICK_STRINGS: &[&str] = &[
    "▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪",
];

pub struct CommandExecutor {
    config: AppConfig,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, command: Commands) -> anyhow::Result<()> {
        // Inspecting a playlist needs no database.
        if let Commands::Info { url, selection } = &command {
            return self.info(url, selection).await;
        }

        let manager = self.open_manager().await?;
        let result = self.run(&manager, command).await;
        manager.shutdown().await.context("Failed to shut down")?;
        result
    }

    async fn run(&self, manager: &ContentManager, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Fetch { url, id, selection } => {
                self.fetch(manager, &url, id, selection.to_options()).await
            }
            Commands::Resume { id } => download(manager, &id).await,
            Commands::List => list(manager).await,
            Commands::Remove { id } => {
                manager
                    .remove_item(&id)
                    .await
                    .with_context(|| format!("Failed to remove {id}"))?;
                println!("Removed {id}");
                Ok(())
            }
            Commands::Info { url, selection } => self.info(&url, &selection).await,
        }
    }

    /// Opens the item database and marks downloads cut short by a previous
    /// run as interrupted.
    async fn open_manager(&self) -> anyhow::Result<ContentManager> {
        let storage = &self.config.offline.storage_path;
        tokio::fs::create_dir_all(storage)
            .await
            .with_context(|| format!("Failed to create storage directory {}", storage.display()))?;

        let database_url = self.config.database_url();
        let store = SqliteStore::connect(&database_url)
            .await
            .with_context(|| format!("Failed to open item database {database_url}"))?;

        let manager = ContentManager::builder(self.config.offline.clone())
            .store(Arc::new(store))
            .codec_support(self.config.codec_support)
            .build()
            .context("Failed to create content manager")?;

        let recovered = manager.recover_interrupted().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "Marked unfinished downloads as interrupted");
        }
        Ok(manager)
    }

    async fn fetch(
        &self,
        manager: &ContentManager,
        url: &str,
        id: Option<String>,
        options: SelectionOptions,
    ) -> anyhow::Result<()> {
        let url = Url::parse(url)
            .with_context(|| format!("Invalid URL: {url}"))?
            .to_string();
        let url = url.as_str();
        let id = match id {
            Some(id) => id,
            None => item_id_for(url)?,
        };

        // Running `fetch` again continues an unfinished item.
        match manager.item(&id).await {
            Ok(existing) if existing.remote_url != url => {
                bail!("Item {id} already exists for {}", existing.remote_url)
            }
            Ok(existing) if existing.state == ItemState::Completed => {
                println!("{id} is already downloaded");
                print_playback_path(manager, &id).await?;
                return Ok(());
            }
            Ok(existing) if existing.state != ItemState::New => {
                info!(item_id = %id, state = %existing.state, "Continuing existing item");
                return download(manager, &id).await;
            }
            Ok(_) => {}
            Err(Error::ItemNotFound { .. }) => {
                manager.add_item(&id, url).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let spinner = spinner("Loading playlists...")?;
        let item = match manager.load_item_metadata(&id, options).await {
            Ok(item) => item,
            Err(e) => {
                spinner.abandon_with_message("Failed");
                if let Err(cleanup) = manager.remove_item(&id).await {
                    warn!(item_id = %id, error = %cleanup, "Failed to discard item");
                }
                return Err(e).with_context(|| format!("Failed to load playlists of {url}"));
            }
        };
        spinner.finish_and_clear();

        print_item(&item);
        download(manager, &id).await
    }

    async fn info(&self, url: &str, selection: &SelectionArgs) -> anyhow::Result<()> {
        let master_url = Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
        let transport = HttpTransport::new(&self.config.offline)?;
        let localizer = HlsLocalizer::new(Arc::new(transport), &self.config.offline);
        let selector = StreamSelector::new(selection.to_options(), self.config.codec_support);

        let spinner = spinner("Loading playlists...")?;
        let id = item_id_for(url)?;
        let metadata = localizer
            .load_metadata(&id, &master_url, &selector)
            .await
            .inspect_err(|_| spinner.abandon_with_message("Failed"))
            .with_context(|| format!("Failed to load playlists of {url}"))?;
        spinner.finish_and_clear();

        print_metadata(&metadata);
        Ok(())
    }
}

/// Starts (or resumes) an item and renders its progress until it stops.
/// Ctrl-C pauses the download.
async fn download(manager: &ContentManager, id: &str) -> anyhow::Result<()> {
    let mut events = manager.subscribe();
    let item = manager
        .start_item(id)
        .await
        .with_context(|| format!("Failed to start {id}"))?;

    let bar = ProgressBar::new(item.estimated_size.unwrap_or(0));
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.yellow} [{bar:30.yellow/white}] {bytes}/{total_bytes} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_position(item.downloaded_size);
    bar.set_message(percent(item.completed_fraction()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ItemEvent::Progress { item_id, downloaded_size, estimated_size, completed_fraction })
                    if item_id == id =>
                {
                    if let Some(total) = estimated_size {
                        // Size estimates come from declared bandwidth and can be short.
                        bar.set_length(total.max(downloaded_size));
                    }
                    bar.set_position(downloaded_size);
                    bar.set_message(percent(completed_fraction));
                }
                Ok(ItemEvent::StateChanged { item_id, state, error }) if item_id == id => {
                    debug!(item_id = %id, %state, "Item state changed");
                    match state {
                        ItemState::Completed => {
                            bar.finish_with_message("done");
                            return print_playback_path(manager, id).await;
                        }
                        ItemState::Failed | ItemState::Interrupted | ItemState::DbFailure => {
                            bar.abandon_with_message(state.to_string());
                            let reason = error.unwrap_or_else(|| "unknown error".to_owned());
                            bail!("Download of {id} stopped ({state}): {reason}");
                        }
                        ItemState::Paused | ItemState::Removed => {
                            bar.abandon_with_message(state.to_string());
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress events lagged"),
                Err(RecvError::Closed) => bail!("Content manager closed"),
            },
            _ = &mut ctrl_c => {
                bar.set_message("pausing...");
                manager.pause_item(id).await.with_context(|| format!("Failed to pause {id}"))?;
                bar.abandon_with_message("paused");
                println!("Paused. Continue with `hls-offline resume {id}`");
                return Ok(());
            }
        }
    }
}

async fn list(manager: &ContentManager) -> anyhow::Result<()> {
    let mut items = manager.items_by_state(&ItemState::ALL).await?;
    if items.is_empty() {
        println!("No items");
        return Ok(());
    }
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    println!(
        "{:<24} {:<15} {:>7} {:>12} {:>12}  {}",
        "ID", "STATE", "DONE", "SIZE", "ESTIMATED", "UPDATED"
    );
    for item in &items {
        println!(
            "{:<24} {:<15} {:>7} {:>12} {:>12}  {}",
            item.id,
            item.state.as_str(),
            percent(item.completed_fraction()),
            HumanBytes(item.downloaded_size).to_string(),
            item.estimated_size
                .map(|size| HumanBytes(size).to_string())
                .unwrap_or_else(|| "-".to_owned()),
            item.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

async fn print_playback_path(manager: &ContentManager, id: &str) -> anyhow::Result<()> {
    let path = manager.item_playback_path(id).await?;
    println!("Playable at {}", path.display());
    Ok(())
}

fn print_item(item: &DownloadItem) {
    println!("{}", item.id);
    if let Some(duration) = item.duration {
        println!("  duration:  {}", HumanDuration(Duration::from_secs_f64(duration)));
    }
    if let Some(size) = item.estimated_size {
        println!("  estimated: {}", HumanBytes(size));
    }
    if let Some(tasks) = item.total_task_count {
        println!("  files:     {tasks}");
    }
    print_tracks("audio", &item.available_audio_tracks, &item.selected_audio_tracks);
    print_tracks("text", &item.available_text_tracks, &item.selected_text_tracks);
}

fn print_metadata(metadata: &LocalizedMetadata) {
    println!(
        "video:     {} ({} bps)",
        metadata.manifests.variant_url, metadata.manifests.variant_bandwidth
    );
    println!(
        "duration:  {}",
        HumanDuration(Duration::from_secs_f64(metadata.duration))
    );
    println!("estimated: {}", HumanBytes(metadata.estimated_size));
    for track_type in TrackType::ALL {
        let count = metadata
            .tasks
            .iter()
            .filter(|t| t.track_type == track_type)
            .count();
        if count > 0 {
            println!("{:<10} {count} files", format!("{track_type}:"));
        }
    }
    print_tracks(
        "audio",
        &metadata.available_audio_tracks,
        &metadata.selected_audio_tracks,
    );
    print_tracks(
        "text",
        &metadata.available_text_tracks,
        &metadata.selected_text_tracks,
    );
}

fn print_tracks(label: &str, available: &[TrackInfo], selected: &[TrackInfo]) {
    if available.is_empty() {
        return;
    }
    println!("  {label} tracks:");
    for track in available {
        let marker = if selected.contains(track) { "*" } else { " " };
        println!(
            "   {marker} {:<6} {}",
            track.language_code.as_deref().unwrap_or("-"),
            track.title
        );
    }
}

fn spinner(message: &'static str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(ProgressStyle::with_template("{spinner:.blue} {msg}")?.tick_strings(TICK_STRINGS));
    pb.set_message(message);
    Ok(pb)
}

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Default item id: the playlist's parent directory name, else its host.
fn item_id_for(url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
    let from_path = parsed.path_segments().and_then(|segments| {
        let segments: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
        segments.iter().rev().nth(1).map(|s| (*s).to_owned())
    });
    match from_path.or_else(|| parsed.host_str().map(str::to_owned)) {
        Some(id) => Ok(id),
        None => bail!("Cannot derive an item id from {url}; pass --id"),
    }
}
