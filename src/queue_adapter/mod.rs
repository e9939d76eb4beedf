//! Generic queue adapter for handing work between tasks.
//!
//! A strategy trait so queue backends can be swapped without touching the
//! scheduler or the worker: the in-memory MPSC adapter ships here; a
//! distributed backend (Redis, PostgreSQL `SKIP LOCKED`) can implement the
//! same trait later.

use anyhow::Result;
use async_trait::async_trait;

mod mpsc;

pub use mpsc::MpscQueueAdapter;

/// Work queue abstraction.
///
/// Implementations must be `Send + Sync`; `pull`/`push` may be called
/// concurrently from multiple async tasks.
#[async_trait]
pub trait QueueAdapter<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Pull the next work item, waiting until one is available. Returns
    /// `None` when the queue is closed.
    async fn pull(&self) -> Option<T>;

    /// Push a work item, waiting for space if the queue is full.
    async fn push(&self, work: T) -> Result<()>;

    /// Acknowledge successful processing. Default no-op for queues without
    /// delivery guarantees.
    async fn ack(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    /// Push without blocking; errors when the queue is full.
    async fn try_push(&self, work: T) -> Result<()> {
        self.push(work).await
    }

    /// Approximate number of queued items, if the backend can report it.
    async fn depth(&self) -> Option<usize> {
        None
    }

    /// Whether the queue is operational.
    async fn is_healthy(&self) -> bool {
        true
    }
}
