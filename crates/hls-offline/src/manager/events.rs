use std::time::{Duration, Instant};

use crate::model::{DownloadItem, ItemState};

/// Notification broadcast to every [`ContentManager`](super::ContentManager) subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    StateChanged {
        item_id: String,
        state: ItemState,
        /// Why the item stopped, for `failed`, `interrupted` and `dbFailure`.
        error: Option<String>,
    },
    Progress {
        item_id: String,
        downloaded_size: u64,
        estimated_size: Option<u64>,
        completed_fraction: f64,
    },
}

impl ItemEvent {
    pub fn item_id(&self) -> &str {
        match self {
            Self::StateChanged { item_id, .. } | Self::Progress { item_id, .. } => item_id,
        }
    }

    pub(crate) fn state(item: &DownloadItem, error: Option<String>) -> Self {
        Self::StateChanged {
            item_id: item.id.clone(),
            state: item.state,
            error,
        }
    }

    pub(crate) fn progress(item: &DownloadItem) -> Self {
        Self::Progress {
            item_id: item.id.clone(),
            downloaded_size: item.downloaded_size,
            estimated_size: item.estimated_size,
            completed_fraction: item.completed_fraction(),
        }
    }
}

/// Rate limiter for the progress notifications of one item.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a notification may go out now; records it when so.
    pub(crate) fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
