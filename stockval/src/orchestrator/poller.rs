//! Status polling.

use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::status::{SegmentStatus, StatusKey, StatusStore};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{key} did not reach a terminal state within {deadline:?}")]
    Timeout { key: StatusKey, deadline: Duration },
}

/// Poll `key` every `interval` until its status is terminal.
///
/// Logs each progress change. Gives up after `deadline`.
pub async fn wait_for_terminal(
    store: &StatusStore,
    key: StatusKey,
    interval: Duration,
    deadline: Duration,
) -> Result<SegmentStatus, PollError> {
    let poll = async {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = None;
        loop {
            ticker.tick().await;
            let current = store.get(key).await;
            if current.status.is_terminal() {
                return current;
            }
            if last_progress != Some(current.progress) {
                info!(key = %key, progress = current.progress, message = %current.message, "Refresh progress");
                last_progress = Some(current.progress);
            }
        }
    };

    tokio::time::timeout(deadline, poll)
        .await
        .map_err(|_| PollError::Timeout { key, deadline })
}
