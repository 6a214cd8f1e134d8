//! Queue API request/response types.
//!
//! The backend serves both camelCase and snake_case field spellings
//! depending on the endpoint generation, so deserialization accepts both.

use serde::{Deserialize, Serialize};

/// Execution status of a task, as tracked by the remote queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task from the queue API.
///
/// `display_number` is the stable human-facing identifier; items without one
/// cannot be tracked and are skipped by the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(default, alias = "displayNumber")]
    pub display_number: Option<u64>,

    #[serde(default, alias = "normalizedContent")]
    pub normalized_content: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default, alias = "gitRemote")]
    pub git_remote: Option<String>,

    #[serde(default, alias = "executionStatus")]
    pub execution_status: Option<ExecutionStatus>,

    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

impl Task {
    /// Instruction text driving the agent, with the original fallback chain.
    pub fn instructions(&self) -> &str {
        self.normalized_content
            .as_deref()
            .or(self.summary.as_deref())
            .unwrap_or("Work on this task")
    }
}

/// Response envelope for the task list endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TaskList {
    #[serde(default)]
    pub todos: Vec<Task>,
}

/// Payload for the status update endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusUpdate<'a> {
    pub display_number: u64,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

/// Response envelope for the status update endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct UpdateResponse {
    #[serde(default)]
    pub success: bool,
}
