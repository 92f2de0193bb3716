//! Bounded-concurrency, pausable download engine for one item.
//!
//! All mutable state (mode, queue, active transfers) sits behind a single
//! lock that is never held across an `.await`. Transfers run as spawned tasks
//! and report back through [`EngineShared::finish`]; the owner observes
//! everything through the [`EngineEvent`] channel returned by
//! [`DownloadEngine::new`].

mod state;
mod worker;

pub use state::{EngineEvent, EngineState};

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OfflineConfig;
use crate::model::DownloadTask;
use crate::queue::WorkQueue;
use crate::transport::Transport;
use crate::{Error, Result, TransferError};

use worker::{WorkerExit, run_transfer};

struct ActiveTransfer {
    task: DownloadTask,
    token: CancellationToken,
    handle: JoinHandle<WorkerExit>,
}

struct EngineCore {
    state: EngineState,
    queue: WorkQueue<DownloadTask>,
    /// Keyed by dispatch sequence number.
    active: BTreeMap<u64, ActiveTransfer>,
    next_id: u64,
}

impl EngineCore {
    /// Queues `tasks`, placing those that carry resume data ahead of everything.
    fn enqueue(&mut self, tasks: Vec<DownloadTask>) {
        let (resumable, fresh): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|t| t.resume_data.is_some());
        self.queue.enqueue_all(fresh);
        self.queue.enqueue_at_front(resumable);
    }
}

pub(crate) struct EngineShared {
    item_id: String,
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    events: mpsc::UnboundedSender<EngineEvent>,
    core: Mutex<EngineCore>,
}

impl EngineShared {
    fn emit(&self, event: EngineEvent) {
        // The owner may have stopped listening; nothing to do then.
        let _ = self.events.send(event);
    }

    fn set_state(&self, core: &mut EngineCore, state: EngineState) {
        debug!(item_id = %self.item_id, from = %core.state, to = %state, "Engine state change");
        core.state = state;
        self.emit(EngineEvent::StateChanged { state });
    }

    /// Starts queued tasks while below the concurrency limit; moves to `Idle`
    /// once nothing is queued or in flight.
    fn dispatch(self: &Arc<Self>, core: &mut EngineCore) {
        if core.state != EngineState::Downloading {
            return;
        }
        while core.active.len() < self.max_concurrent {
            let Some(task) = core.queue.dequeue() else {
                break;
            };
            let id = core.next_id;
            core.next_id += 1;

            let token = CancellationToken::new();
            let handle = tokio::spawn(run_transfer(
                Arc::clone(self),
                id,
                task.clone(),
                token.clone(),
            ));
            core.active.insert(id, ActiveTransfer {
                task,
                token,
                handle,
            });
        }

        if core.active.is_empty() && core.queue.is_empty() {
            self.set_state(core, EngineState::Idle);
        }
    }

    /// Completion path of a transfer task.
    fn finish(self: &Arc<Self>, id: u64, task: DownloadTask, result: std::result::Result<(), TransferError>) {
        let mut core = self.core.lock();
        core.active.remove(&id);

        match result {
            Ok(()) => self.emit(EngineEvent::TaskCompleted { task }),
            Err(error) => {
                warn!(item_id = %self.item_id, url = %task.content_url, error = %error, "Transfer failed");
                self.emit(EngineEvent::TaskFailed { task, error });
            }
        }

        self.dispatch(&mut core);
    }
}

/// Handle to the engine of one item. Cloning shares the same engine.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineShared>,
}

impl DownloadEngine {
    /// Creates an engine in state `New` holding `tasks`.
    pub fn new(
        item_id: impl Into<String>,
        tasks: Vec<DownloadTask>,
        transport: Arc<dyn Transport>,
        config: &OfflineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let mut core = EngineCore {
            state: EngineState::New,
            queue: WorkQueue::with_config(config.queue),
            active: BTreeMap::new(),
            next_id: 0,
        };
        core.enqueue(tasks);

        let inner = Arc::new(EngineShared {
            item_id: item_id.into(),
            transport,
            max_concurrent: config.max_concurrent_downloads.max(1),
            events,
            core: Mutex::new(core),
        });
        (Self { inner }, rx)
    }

    pub fn item_id(&self) -> &str {
        &self.inner.item_id
    }

    pub fn state(&self) -> EngineState {
        self.inner.core.lock().state
    }

    pub fn active_count(&self) -> usize {
        self.inner.core.lock().active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.core.lock().queue.len()
    }

    /// Begins dispatching. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state != EngineState::New {
            return Err(Error::DownloadAlreadyStarted);
        }
        info!(item_id = %self.inner.item_id, queued = core.queue.len(), "Starting downloads");
        self.inner.set_state(&mut core, EngineState::Downloading);
        self.inner.dispatch(&mut core);
        Ok(())
    }

    /// Adds tasks to a running engine, waking it up when idle.
    pub fn add_tasks(&self, tasks: Vec<DownloadTask>) -> Result<()> {
        let mut core = self.inner.core.lock();
        match core.state {
            EngineState::Downloading => {}
            EngineState::Idle => self.inner.set_state(&mut core, EngineState::Downloading),
            state => {
                return Err(Error::CannotAddDownloads {
                    state: state.to_string(),
                });
            }
        }
        core.enqueue(tasks);
        self.inner.dispatch(&mut core);
        Ok(())
    }

    /// Resumes a paused engine with the remaining `tasks`.
    pub fn resume(&self, tasks: Vec<DownloadTask>) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state != EngineState::Paused {
            return Err(Error::invalid_state("resume downloads", core.state));
        }
        core.enqueue(tasks);
        self.inner.set_state(&mut core, EngineState::Downloading);
        self.inner.dispatch(&mut core);
        Ok(())
    }

    /// Stops every transfer and waits until all of them acknowledged.
    ///
    /// Returns the interrupted tasks with the resume tokens the transport
    /// produced. Queued tasks are dropped; the caller's task list remains the
    /// source of truth for what is left.
    pub async fn pause(&self) -> Result<Vec<DownloadTask>> {
        let transfers: Vec<ActiveTransfer> = {
            let mut core = self.inner.core.lock();
            match core.state {
                EngineState::Downloading | EngineState::Idle => {}
                state => return Err(Error::invalid_state("pause downloads", state)),
            }
            // Set before cancelling so late completions do not dispatch.
            core.state = EngineState::Paused;
            core.queue.purge();
            std::mem::take(&mut core.active).into_values().collect()
        };

        for transfer in &transfers {
            transfer.token.cancel();
        }

        let exits = join_all(
            transfers
                .into_iter()
                .map(|t| async move { (t.task, t.handle.await) }),
        )
        .await;

        let mut paused = Vec::new();
        for (mut task, exit) in exits {
            match exit {
                Ok(WorkerExit::Cancelled(resume)) => {
                    task.resume_data = resume;
                    paused.push(task);
                }
                Ok(WorkerExit::Finished) => {}
                Err(e) => {
                    warn!(item_id = %self.inner.item_id, url = %task.content_url, error = %e, "Transfer task aborted");
                    task.resume_data = None;
                    paused.push(task);
                }
            }
        }

        info!(item_id = %self.inner.item_id, interrupted = paused.len(), "Downloads paused");
        self.inner.emit(EngineEvent::StateChanged {
            state: EngineState::Paused,
        });
        Ok(paused)
    }

    /// Stops every transfer without collecting resume tokens. Terminal.
    pub fn cancel(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state == EngineState::Cancelled {
            return Err(Error::invalid_state("cancel downloads", core.state));
        }
        core.queue.purge();
        for (_, transfer) in std::mem::take(&mut core.active) {
            transfer.token.cancel();
        }
        info!(item_id = %self.inner.item_id, "Downloads cancelled");
        self.inner.set_state(&mut core, EngineState::Cancelled);
        Ok(())
    }
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("item_id", &self.inner.item_id)
            .field("state", &self.state())
            .finish()
    }
}
