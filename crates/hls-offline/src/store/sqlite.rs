use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::info;
use url::Url;

use super::ItemStore;
use crate::localizer::LocalizedManifests;
use crate::model::{
    DownloadItem, DownloadTask, ItemState, ResumeToken, TaskKey, TrackInfo, TrackType,
};
use crate::{Error, Result};

const DEFAULT_POOL_SIZE: u32 = 5;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

const ITEM_COLUMNS: &str = "id, remote_url, state, estimated_size, downloaded_size, \
     total_task_count, completed_task_count, duration, available_audio_tracks, \
     available_text_tracks, selected_audio_tracks, selected_text_tracks, created_at, updated_at";

const TASK_COLUMNS: &str =
    "item_id, content_url, track_type, destination, task_order, resume_data, downloaded_bytes";

#[derive(Debug, FromRow)]
struct ItemRow {
    id: String,
    remote_url: String,
    state: String,
    estimated_size: Option<i64>,
    downloaded_size: i64,
    total_task_count: Option<i64>,
    completed_task_count: Option<i64>,
    duration: Option<f64>,
    available_audio_tracks: String,
    available_text_tracks: String,
    selected_audio_tracks: String,
    selected_text_tracks: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn tracks_from_json(json: &str) -> Result<Vec<TrackInfo>> {
    Ok(serde_json::from_str(json)?)
}

impl TryFrom<ItemRow> for DownloadItem {
    type Error = Error;

    fn try_from(row: ItemRow) -> Result<Self> {
        let state = ItemState::parse(&row.state)
            .ok_or_else(|| Error::storage(format!("invalid item state `{}`", row.state)))?;
        Ok(DownloadItem {
            id: row.id,
            remote_url: row.remote_url,
            state,
            estimated_size: row.estimated_size.map(|v| v as u64),
            downloaded_size: row.downloaded_size as u64,
            total_task_count: row.total_task_count.map(|v| v as u64),
            completed_task_count: row.completed_task_count.map(|v| v as u64),
            duration: row.duration,
            available_audio_tracks: tracks_from_json(&row.available_audio_tracks)?,
            available_text_tracks: tracks_from_json(&row.available_text_tracks)?,
            selected_audio_tracks: tracks_from_json(&row.selected_audio_tracks)?,
            selected_text_tracks: tracks_from_json(&row.selected_text_tracks)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    item_id: String,
    content_url: String,
    track_type: String,
    destination: String,
    task_order: i64,
    resume_data: Option<Vec<u8>>,
    downloaded_bytes: i64,
}

impl TryFrom<TaskRow> for DownloadTask {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let content_url = Url::parse(&row.content_url)
            .map_err(|e| Error::storage(format!("invalid task URL `{}`: {e}", row.content_url)))?;
        let track_type = TrackType::parse(&row.track_type)
            .ok_or_else(|| Error::storage(format!("invalid track type `{}`", row.track_type)))?;
        Ok(DownloadTask {
            item_id: row.item_id,
            content_url,
            track_type,
            destination: PathBuf::from(row.destination),
            order: row.task_order as u32,
            resume_data: row.resume_data.map(ResumeToken::from_bytes),
            downloaded_bytes: row.downloaded_bytes as u64,
        })
    }
}

/// [`ItemStore`] backed by SQLite through `sqlx`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `database_url` in WAL mode
    /// and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_size(database_url, DEFAULT_POOL_SIZE).await
    }

    /// Private in-memory database. Every connection of an in-memory pool sees
    /// its own database, so the pool keeps exactly one connection alive.
    pub async fn in_memory() -> Result<Self> {
        let pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::open("sqlite::memory:", pool_options).await
    }

    pub async fn connect_with_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30));
        Self::open(database_url, pool_options).await
    }

    async fn open(database_url: &str, pool_options: SqlitePoolOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = pool_options.connect_with(connect_options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(url = database_url, "Item database ready");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_item(&self, id: &str) -> Result<Option<DownloadItem>> {
        sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM download_items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(DownloadItem::try_from)
        .transpose()
    }
}

fn tracks_json(tracks: &[TrackInfo]) -> Result<String> {
    Ok(serde_json::to_string(tracks)?)
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert_item(&self, item: &DownloadItem) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO download_items ({ITEM_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&item.id)
        .bind(&item.remote_url)
        .bind(item.state.as_str())
        .bind(item.estimated_size.map(|v| v as i64))
        .bind(item.downloaded_size as i64)
        .bind(item.total_task_count.map(|v| v as i64))
        .bind(item.completed_task_count.map(|v| v as i64))
        .bind(item.duration)
        .bind(tracks_json(&item.available_audio_tracks)?)
        .bind(tracks_json(&item.available_text_tracks)?)
        .bind(tracks_json(&item.selected_audio_tracks)?)
        .bind(tracks_json(&item.selected_text_tracks)?)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn item(&self, id: &str) -> Result<Option<DownloadItem>> {
        self.fetch_item(id).await
    }

    async fn items_in_states(&self, states: &[ItemState]) -> Result<Vec<DownloadItem>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {ITEM_COLUMNS} FROM download_items WHERE state IN ("
        ));
        let mut separated = builder.separated(", ");
        for state in states {
            separated.push_bind(state.as_str());
        }
        separated.push_unseparated(") ORDER BY created_at, id");

        builder
            .build_query_as::<ItemRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(DownloadItem::try_from)
            .collect()
    }

    async fn update_item(&self, item: &DownloadItem) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE download_items SET
                remote_url = ?,
                state = ?,
                estimated_size = ?,
                downloaded_size = ?,
                total_task_count = ?,
                completed_task_count = ?,
                duration = ?,
                available_audio_tracks = ?,
                available_text_tracks = ?,
                selected_audio_tracks = ?,
                selected_text_tracks = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.remote_url)
        .bind(item.state.as_str())
        .bind(item.estimated_size.map(|v| v as i64))
        .bind(item.downloaded_size as i64)
        .bind(item.total_task_count.map(|v| v as i64))
        .bind(item.completed_task_count.map(|v| v as i64))
        .bind(item.duration)
        .bind(tracks_json(&item.available_audio_tracks)?)
        .bind(tracks_json(&item.available_text_tracks)?)
        .bind(tracks_json(&item.selected_audio_tracks)?)
        .bind(tracks_json(&item.selected_text_tracks)?)
        .bind(item.updated_at)
        .bind(&item.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::item_not_found(&item.id));
        }
        Ok(())
    }

    async fn update_state(&self, id: &str, state: ItemState) -> Result<DownloadItem> {
        sqlx::query_as::<_, ItemRow>(&format!(
            "UPDATE download_items SET state = ?, updated_at = ? WHERE id = ? RETURNING {ITEM_COLUMNS}"
        ))
        .bind(state.as_str())
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::item_not_found(id))?
        .try_into()
    }

    async fn increment_downloaded(&self, task: &TaskKey, bytes: u64) -> Result<DownloadItem> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE download_tasks SET downloaded_bytes = downloaded_bytes + ? \
             WHERE item_id = ? AND content_url = ? AND track_type = ?",
        )
        .bind(bytes as i64)
        .bind(&task.item_id)
        .bind(task.content_url.as_str())
        .bind(task.track_type.as_str())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "UPDATE download_items SET downloaded_size = downloaded_size + ?, updated_at = ? \
             WHERE id = ? RETURNING {ITEM_COLUMNS}"
        ))
        .bind(bytes as i64)
        .bind(Utc::now())
        .bind(&task.item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::item_not_found(&task.item_id))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn rewind_task(&self, task: &TaskKey, offset: u64) -> Result<DownloadItem> {
        let mut tx = self.pool.begin().await?;

        let counted: Option<(i64,)> = sqlx::query_as(
            "SELECT downloaded_bytes FROM download_tasks \
             WHERE item_id = ? AND content_url = ? AND track_type = ?",
        )
        .bind(&task.item_id)
        .bind(task.content_url.as_str())
        .bind(task.track_type.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((counted,)) = counted
            && counted as u64 > offset
        {
            sqlx::query(
                "UPDATE download_tasks SET downloaded_bytes = ? \
                 WHERE item_id = ? AND content_url = ? AND track_type = ?",
            )
            .bind(offset as i64)
            .bind(&task.item_id)
            .bind(task.content_url.as_str())
            .bind(task.track_type.as_str())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE download_items SET downloaded_size = MAX(downloaded_size - ?, 0), \
                 updated_at = ? WHERE id = ?",
            )
            .bind(counted - offset as i64)
            .bind(Utc::now())
            .bind(&task.item_id)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM download_items WHERE id = ?"
        ))
        .bind(&task.item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::item_not_found(&task.item_id))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn remove_item(&self, id: &str) -> Result<()> {
        // Tasks go with the item (ON DELETE CASCADE).
        sqlx::query("DELETE FROM download_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_metadata(
        &self,
        item: &DownloadItem,
        tasks: &[DownloadTask],
        manifests: &LocalizedManifests,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE download_items SET
                state = ?,
                estimated_size = ?,
                downloaded_size = ?,
                total_task_count = ?,
                completed_task_count = ?,
                duration = ?,
                available_audio_tracks = ?,
                available_text_tracks = ?,
                selected_audio_tracks = ?,
                selected_text_tracks = ?,
                manifests = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.state.as_str())
        .bind(item.estimated_size.map(|v| v as i64))
        .bind(item.downloaded_size as i64)
        .bind(item.total_task_count.map(|v| v as i64))
        .bind(item.completed_task_count.map(|v| v as i64))
        .bind(item.duration)
        .bind(tracks_json(&item.available_audio_tracks)?)
        .bind(tracks_json(&item.available_text_tracks)?)
        .bind(tracks_json(&item.selected_audio_tracks)?)
        .bind(tracks_json(&item.selected_text_tracks)?)
        .bind(serde_json::to_string(manifests)?)
        .bind(item.updated_at)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::item_not_found(&item.id));
        }

        sqlx::query("DELETE FROM download_tasks WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        for task in tasks {
            sqlx::query(&format!(
                "INSERT INTO download_tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&task.item_id)
            .bind(task.content_url.as_str())
            .bind(task.track_type.as_str())
            .bind(task.destination.to_string_lossy().into_owned())
            .bind(task.order as i64)
            .bind(task.resume_data.as_ref().map(|r| r.as_bytes().to_vec()))
            .bind(task.downloaded_bytes as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn tasks(&self, item_id: &str) -> Result<Vec<DownloadTask>> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM download_tasks WHERE item_id = ? ORDER BY task_order, rowid"
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(DownloadTask::try_from)
        .collect()
    }

    async fn complete_task(&self, task: &DownloadTask) -> Result<DownloadItem> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM download_tasks WHERE item_id = ? AND content_url = ? AND track_type = ?",
        )
        .bind(&task.item_id)
        .bind(task.content_url.as_str())
        .bind(task.track_type.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed > 0 {
            sqlx::query(
                "UPDATE download_items SET completed_task_count = COALESCE(completed_task_count, 0) + 1, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(Utc::now())
            .bind(&task.item_id)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM download_items WHERE id = ?"
        ))
        .bind(&task.item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::item_not_found(&task.item_id))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn save_resume_tokens(&self, tasks: &[DownloadTask]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            sqlx::query(
                "UPDATE download_tasks SET resume_data = ? \
                 WHERE item_id = ? AND content_url = ? AND track_type = ?",
            )
            .bind(task.resume_data.as_ref().map(|r| r.as_bytes().to_vec()))
            .bind(&task.item_id)
            .bind(task.content_url.as_str())
            .bind(task.track_type.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_tasks(&self, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM download_tasks WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn manifests(&self, item_id: &str) -> Result<Option<LocalizedManifests>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT manifests FROM download_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
        match row.and_then(|(json,)| json) {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
