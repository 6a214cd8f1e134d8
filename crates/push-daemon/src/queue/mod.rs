//! Task queue API integration.
//!
//! Provides a reqwest-based client for the Push backend, covering the two
//! operations the daemon needs: listing tasks queued for execution and
//! patching a task's execution status.

mod client;
pub mod types;


pub use client::{QueueClient, QueueConfig, QueueError};
pub use types::{ExecutionStatus, Task};

/// The queue operations the scheduler depends on.
///
/// The production implementation is [`QueueClient`]; tests substitute an
/// in-memory queue.
#[allow(async_fn_in_trait)]
pub trait TaskQueue {
    /// List tasks awaiting execution, optionally scoped to one project by
    /// its normalized git remote.
    async fn fetch_queued(&self, scope: Option<&str>) -> Result<Vec<Task>, QueueError>;

    /// Report a task's execution status. Best-effort by contract: callers
    /// log failures and move on; updates are never retried.
    async fn update_status(
        &self,
        display_number: u64,
        status: ExecutionStatus,
        summary: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), QueueError>;
}
