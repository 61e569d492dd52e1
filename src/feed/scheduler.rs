//! Per-session driver loop: sleep for the interval, run one cycle, repeat.

use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::session::{CycleError, FeedSession};

/// Spawn the driver for `session`.
///
/// The loop holds only a weak reference between cycles, so dropping the last
/// session handle ends it as well.
pub(crate) fn spawn_driver(
    session: Weak<FeedSession>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(session, interval, cancel))
}

async fn run(session: Weak<FeedSession>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(session) = session.upgrade() else {
            break;
        };
        match session.update().await {
            Ok(_) => {}
            Err(CycleError::Cancelled) => break,
            Err(e) => {
                tracing::warn!(feed = %session.url(), error = %e, "Feed update failed");
            }
        }
    }

    tracing::debug!("Feed driver stopped");
}
