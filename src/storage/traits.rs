//! Storage layer trait definitions and common types.

use crate::errors::StorageError;
use async_trait::async_trait;

/// Result type alias for storage operations.
///
/// All storage operations return this type so callers handle one error
/// domain regardless of the backing implementation.
pub type StorageResult<T> = Result<T, StorageError>;

/// Core storage trait for health monitoring.
///
/// Implementations must be `Send + Sync`; operations may be called
/// concurrently from multiple async tasks.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Verify the backend is reachable with a lightweight operation
    /// (`SELECT 1` for databases; a no-op for in-memory stores).
    async fn health_check(&self) -> StorageResult<()>;
}
