//! Background task infrastructure.
//!
//! Two long-running tasks drive delayed rule execution: the scheduler polls
//! storage for due units and pushes them onto the work queue; the worker
//! pulls units and executes them through the engines. Both shut down
//! gracefully via cancellation tokens.

pub mod manager;
pub mod scheduler;
pub mod worker;

pub use manager::spawn_managed_task;
pub use scheduler::{SchedulerError, SchedulerTask};
pub use worker::{WorkerError, WorkerTask};
