//! Helpers for spawning background tasks with consistent lifecycle
//! handling: start/stop logging, shutdown on failure, graceful cancellation.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Spawn a task that triggers application shutdown if it fails.
///
/// Tasks are expected to watch the token themselves and return `Ok(())` on
/// graceful cancellation; an `Err` from any task cancels the whole
/// application.
pub fn spawn_managed_task<F>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_future: F,
) where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting background task");

    let task_token = app_token.clone();

    tracker.spawn(async move {
        match task_future.await {
            Ok(()) => {
                info!(task = task_name, "Background task completed");
            }
            Err(e) => {
                error!(task = task_name, error = ?e, "Background task failed unexpectedly");
                task_token.cancel();
            }
        }
    });
}
