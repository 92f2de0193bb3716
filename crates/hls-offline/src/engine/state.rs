use crate::TransferError;
use crate::model::{DownloadTask, TaskKey};

/// Lifecycle of a [`DownloadEngine`](super::DownloadEngine).
///
/// `New -> Downloading <-> Idle`, `Downloading | Idle -> Paused -> Downloading`,
/// and any state except `Cancelled` may move to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    New,
    Downloading,
    /// Nothing queued or in flight; more tasks may still be added.
    Idle,
    Paused,
    Cancelled,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Downloading => "downloading",
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the engine to its owner.
#[derive(Debug)]
pub enum EngineEvent {
    /// A transfer of `task` begins writing at `offset`.
    TransferStarted { task: TaskKey, offset: u64 },
    /// Bytes written for `task` since its previous progress event.
    Progress { task: TaskKey, bytes: u64 },
    /// The task's file is at its destination.
    TaskCompleted { task: DownloadTask },
    /// The task failed; it is not retried by the engine.
    TaskFailed {
        task: DownloadTask,
        error: TransferError,
    },
    StateChanged { state: EngineState },
}
