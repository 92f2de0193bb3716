use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{EngineEvent, EngineShared};
use crate::TransferError;
use crate::model::{DownloadTask, ResumeToken};
use crate::transport::{ProgressFn, TransferOutcome, TransferProgress, TransferRequest};

/// How a transfer task ended, collected by `pause()`.
#[derive(Debug)]
pub(super) enum WorkerExit {
    /// Completed or failed; already reported through an event.
    Finished,
    Cancelled(Option<ResumeToken>),
}

pub(super) async fn run_transfer(
    shared: Arc<EngineShared>,
    id: u64,
    task: DownloadTask,
    token: CancellationToken,
) -> WorkerExit {
    let request = TransferRequest {
        url: task.content_url.clone(),
        staging_path: task.staging_path(),
        resume: task.resume_data.clone(),
    };

    let key = task.key();
    if task.resume_data.is_none() {
        let _ = shared.events.send(EngineEvent::TransferStarted {
            task: key.clone(),
            offset: 0,
        });
    }

    let events = shared.events.clone();
    let progress: ProgressFn = Arc::new(move |update| {
        let event = match update {
            TransferProgress::Started { offset } => EngineEvent::TransferStarted {
                task: key.clone(),
                offset,
            },
            TransferProgress::Written(bytes) => EngineEvent::Progress {
                task: key.clone(),
                bytes,
            },
        };
        let _ = events.send(event);
    });

    trace!(url = %task.content_url, "Transfer started");
    match shared.transport.fetch(request, progress, token.clone()).await {
        Ok(TransferOutcome::Completed { path, .. }) => {
            let placed = place_file(&path, &task.destination).await;
            shared.finish(id, task, placed);
            WorkerExit::Finished
        }
        Ok(TransferOutcome::Cancelled { resume }) => WorkerExit::Cancelled(resume),
        Err(_) if token.is_cancelled() => WorkerExit::Cancelled(None),
        Err(error) => {
            shared.finish(id, task, Err(error));
            WorkerExit::Finished
        }
    }
}

/// Moves a fetched file to its destination, replacing whatever is there.
async fn place_file(staging: &Path, destination: &Path) -> Result<(), TransferError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(parent, e))?;
    }

    if fs::try_exists(destination).await.unwrap_or(false) {
        warn!(path = %destination.display(), "Destination already exists, overwriting");
        fs::remove_file(destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?;
    }

    fs::rename(staging, destination)
        .await
        .map_err(|e| TransferError::io(destination, e))
}
