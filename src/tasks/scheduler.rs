//! Background task that moves due delayed work onto the execution queue.
//!
//! The scheduler never executes rules itself. Every poll interval it asks
//! the scheduled-work storage for units whose fire time has passed, pushes
//! each onto the queue, and deletes it from storage once queued. Condition
//! re-evaluation happens in the worker at execution time.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::queue_adapter::QueueAdapter;
use crate::storage::scheduled::{ScheduledUnit, ScheduledWorkStorage};

/// Scheduler task errors following the error-mailflow-<domain>-<number> format
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("error-mailflow-scheduler-1 Scheduled work storage operation failed: {0}")]
    StorageError(#[from] crate::errors::StorageError),

    #[error("error-mailflow-scheduler-2 Queue adapter operation failed: {0}")]
    QueueAdapterError(String),
}

/// Poll-loop scheduler for delayed rule units.
pub struct SchedulerTask {
    storage: Arc<dyn ScheduledWorkStorage>,
    queue_adapter: Arc<dyn QueueAdapter<ScheduledUnit>>,
    cancel_token: CancellationToken,
    poll_interval: Duration,
}

impl SchedulerTask {
    pub fn new(
        storage: Arc<dyn ScheduledWorkStorage>,
        queue_adapter: Arc<dyn QueueAdapter<ScheduledUnit>>,
        cancel_token: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            storage,
            queue_adapter,
            cancel_token,
            poll_interval,
        }
    }

    /// Run the scheduler loop until cancelled.
    #[instrument(skip_all)]
    pub async fn run(self) -> Result<(), SchedulerError> {
        info!(poll_secs = self.poll_interval.as_secs(), "Starting scheduler task");

        while !self.cancel_token.is_cancelled() {
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {
                    if let Err(e) = self.dispatch_due_units().await {
                        error!(error = ?e, "Error dispatching due scheduled units");
                    }
                }
                () = self.cancel_token.cancelled() => {
                    info!("Scheduler task cancelled");
                    break;
                }
            }
        }

        info!("Scheduler task stopped");
        Ok(())
    }

    /// Queue every unit whose fire time has passed.
    ///
    /// Storage deletion happens only after a successful push; a failed push
    /// leaves the unit in place for the next poll.
    pub async fn dispatch_due_units(&self) -> Result<(), SchedulerError> {
        let due = self.storage.get_due(chrono::Utc::now()).await?;

        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "Dispatching due scheduled units");

        for unit in due {
            let unit_id = unit.id.clone();
            match self.queue_adapter.push(unit).await {
                Ok(()) => {
                    if let Err(e) = self.storage.delete(&unit_id).await {
                        // The unit will be re-queued next poll; the worker's
                        // status re-check makes the duplicate harmless.
                        error!(error = ?e, unit = %unit_id, "Failed to delete dispatched unit");
                    } else {
                        debug!(unit = %unit_id, "Dispatched scheduled unit");
                    }
                }
                Err(e) => {
                    error!(error = ?e, unit = %unit_id, "Failed to queue scheduled unit");
                }
            }
        }

        Ok(())
    }
}
