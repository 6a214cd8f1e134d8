//! Execution snapshot publishing.
//!
//! The daemon rewrites a JSON snapshot of its state every tick for external
//! viewers. Writes are atomic (sibling temp file + rename) so a concurrent
//! reader never observes a partial document; a missing or unparsable file
//! means "daemon offline" by contract, never an error.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::queue::ExecutionStatus;

/// Errors from snapshot publishing.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of the publishing daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonMeta {
    pub pid: u32,
    pub version: String,
    pub machine_name: String,
}

/// Concurrency statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SnapshotStats {
    pub running: usize,
    pub max_concurrent: usize,
    pub completed_today: usize,
}

/// One task row in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEntry {
    pub display_number: u64,
    pub summary: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full daemon state snapshot, rewritten wholesale on every tick.
/// Latest write wins; there is no other lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub daemon: DaemonMeta,
    pub stats: SnapshotStats,
    pub active_tasks: Vec<TaskEntry>,
    pub completed_today: Vec<TaskEntry>,
}

/// Writes execution snapshots to the well-known status path.
#[derive(Debug)]
pub struct StatusPublisher {
    path: PathBuf,
    meta: DaemonMeta,
}

impl StatusPublisher {
    /// Create a publisher for the given snapshot path.
    pub fn new(path: PathBuf, machine_name: String) -> Self {
        Self {
            path,
            meta: DaemonMeta {
                pid: std::process::id(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                machine_name,
            },
        }
    }

    /// Identity stamped into every snapshot.
    pub const fn meta(&self) -> &DaemonMeta {
        &self.meta
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the snapshot on disk.
    pub async fn publish(&self, snapshot: &ExecutionSnapshot) -> Result<(), StatusError> {
        let json = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = json.len(), "Snapshot published");
        Ok(())
    }
}
