use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::events::ProgressThrottle;
use super::{ItemEvent, ManagerShared};
use crate::engine::{DownloadEngine, EngineEvent, EngineState};
use crate::model::{DownloadItem, DownloadTask, ItemState};
use crate::{Error, Result, TransferError};

/// What the pump does after handling an event.
enum Flow {
    Continue,
    Stop,
}

/// Item state after a transfer failure.
pub(super) fn failure_state(error: &TransferError) -> ItemState {
    if error.is_retryable() {
        ItemState::Interrupted
    } else {
        ItemState::Failed
    }
}

struct Pump {
    shared: Arc<ManagerShared>,
    engine: DownloadEngine,
    item_id: String,
    throttle: ProgressThrottle,
    /// Set once the engine was paused; cleared when it downloads again.
    halted: bool,
}

/// Consumes the events of one item's engine until the item completes or the
/// engine is cancelled.
pub(super) async fn run(
    shared: Arc<ManagerShared>,
    engine: DownloadEngine,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) {
    let mut pump = Pump {
        throttle: ProgressThrottle::new(shared.config.progress_throttle),
        item_id: engine.item_id().to_owned(),
        shared,
        engine,
        halted: false,
    };

    while let Some(event) = events.recv().await {
        if pump.engine.state() == EngineState::Cancelled {
            break;
        }
        let flow = match pump.handle(event).await {
            Ok(flow) => flow,
            Err(e) => {
                pump.store_failed(e).await;
                Flow::Stop
            }
        };
        if let Flow::Stop = flow {
            break;
        }
    }
    debug!(item_id = %pump.item_id, "Event pump finished");
}

impl Pump {
    async fn handle(&mut self, event: EngineEvent) -> Result<Flow> {
        match event {
            EngineEvent::TransferStarted { task, offset } => {
                trace!(item_id = %self.item_id, url = %task.content_url, offset, "Transfer started");
                let item = self.shared.store.rewind_task(&task, offset).await?;
                self.progress(&item);
            }
            EngineEvent::Progress { task, bytes } => {
                let item = self.shared.store.increment_downloaded(&task, bytes).await?;
                self.progress(&item);
            }
            EngineEvent::TaskCompleted { task } => {
                let item = self.shared.store.complete_task(&task).await?;
                self.progress(&item);
            }
            EngineEvent::TaskFailed { task, error } => return self.task_failed(task, error).await,
            EngineEvent::StateChanged { state } => match state {
                EngineState::Downloading => self.halted = false,
                EngineState::Paused => self.halted = true,
                EngineState::Idle if !self.halted => return self.engine_idle().await,
                EngineState::Cancelled => return Ok(Flow::Stop),
                EngineState::New | EngineState::Idle => {}
            },
        }
        Ok(Flow::Continue)
    }

    fn progress(&mut self, item: &DownloadItem) {
        if self.throttle.ready() {
            self.shared.emit(ItemEvent::progress(item));
        }
    }

    /// The first failure stops the item; later ones are only logged.
    async fn task_failed(&mut self, task: DownloadTask, error: TransferError) -> Result<Flow> {
        if self.halted {
            debug!(item_id = %self.item_id, url = %task.content_url, error = %error, "Failure after halt");
            return Ok(Flow::Continue);
        }
        self.halted = true;

        let interrupted = match self.engine.pause().await {
            Ok(tasks) => tasks,
            Err(e) => {
                // Already paused by the application; that state stands.
                debug!(item_id = %self.item_id, error = %e, "Engine not running");
                return Ok(Flow::Continue);
            }
        };
        self.shared.store.save_resume_tokens(&interrupted).await?;

        let state = failure_state(&error);
        let reason = if error.is_disk_full() {
            let item = self.shared.store.item(&self.item_id).await?;
            let required_bytes = item.map(|i| i.remaining_estimate()).unwrap_or(0);
            let available_bytes = self
                .shared
                .space_probe
                .available_space(&self.shared.config.storage_path)
                .unwrap_or(0);
            Error::InsufficientDiskSpace {
                available_bytes,
                required_bytes,
            }
            .to_string()
        } else {
            error.to_string()
        };

        warn!(item_id = %self.item_id, url = %task.content_url, state = %state, error = %reason, "Item stopped");
        self.shared.set_state(&self.item_id, state, Some(reason)).await?;

        if state == ItemState::Failed {
            self.shared.engines.remove(&self.item_id);
            let _ = self.engine.cancel();
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    /// Every queued transfer finished: write the local manifests and complete.
    async fn engine_idle(&mut self) -> Result<Flow> {
        // A pause may have raced with the idle notification.
        if self.engine.state() != EngineState::Idle {
            return Ok(Flow::Continue);
        }

        let remaining = self.shared.store.tasks(&self.item_id).await?;
        if !remaining.is_empty() {
            warn!(item_id = %self.item_id, remaining = remaining.len(), "Engine idle with pending tasks");
            self.halted = true;
            let _ = self.engine.pause().await;
            self.shared
                .set_state(
                    &self.item_id,
                    ItemState::Interrupted,
                    Some(format!("{} tasks did not complete", remaining.len())),
                )
                .await?;
            return Ok(Flow::Continue);
        }

        let manifests = self
            .shared
            .store
            .manifests(&self.item_id)
            .await?
            .ok_or_else(|| Error::storage(format!("no manifests stored for item {}", self.item_id)))?;

        let root = self.shared.item_root(&self.item_id);
        let (state, reason) = match manifests.save_local_files(&root).await {
            Ok(()) => {
                info!(item_id = %self.item_id, path = %root.display(), "Item completed");
                (ItemState::Completed, None)
            }
            Err(e) => {
                error!(item_id = %self.item_id, error = %e, "Failed to write local manifests");
                (ItemState::Failed, Some(e.to_string()))
            }
        };

        self.shared.engines.remove(&self.item_id);
        let item = self.shared.set_state(&self.item_id, state, reason).await?;
        self.shared.emit(ItemEvent::progress(&item));
        Ok(Flow::Stop)
    }

    /// The store rejected an update: park the item in `dbFailure`.
    async fn store_failed(&mut self, err: Error) {
        if self.engine.state() == EngineState::Cancelled {
            return;
        }
        error!(item_id = %self.item_id, error = %err, "Store update failed");

        self.shared.engines.remove(&self.item_id);
        let _ = self.engine.pause().await;
        let _ = self.engine.cancel();
        if let Err(e) = self
            .shared
            .set_state(&self.item_id, ItemState::DbFailure, Some(err.to_string()))
            .await
        {
            error!(item_id = %self.item_id, error = %e, "Could not record store failure");
        }
    }
}
