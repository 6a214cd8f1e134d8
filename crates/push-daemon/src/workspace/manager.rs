//! Workspace manager: git worktree operations, one worktree per task.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Timeout for individual git subcommands.
const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Git command failed: {0}")]
    Git(String),

    #[error("Git command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Manages per-task git worktree workspaces.
///
/// Each task gets a worktree at `<base_dir>/push-<n>` on branch `push-<n>`,
/// both derived deterministically from the task's display number. Workspaces
/// persist after the task finishes so the operator can inspect or merge the
/// result; the daemon never removes them.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    repo_dir: PathBuf,
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Create a new workspace manager rooted at the given repository.
    pub const fn new(repo_dir: PathBuf, base_dir: PathBuf) -> Self {
        Self { repo_dir, base_dir }
    }

    /// Deterministic workspace path for a task.
    pub fn workspace_path(&self, display_number: u64) -> PathBuf {
        self.base_dir.join(format!("push-{display_number}"))
    }

    /// Branch name bound to a task's workspace.
    pub fn branch_name(display_number: u64) -> String {
        format!("push-{display_number}")
    }

    /// Ensure the workspace for a task exists, creating it on first use.
    ///
    /// Idempotent: an existing directory is returned unchanged, which lets a
    /// restarted daemon resume without re-provisioning. A branch left over
    /// from an earlier run is attached instead of recreated.
    pub async fn ensure(&self, display_number: u64) -> Result<PathBuf, WorkspaceError> {
        let path = self.workspace_path(display_number);
        if path.exists() {
            debug!(display_number, path = %path.display(), "Workspace already exists, reusing");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.base_dir).await?;

        let branch = Self::branch_name(display_number);
        let output = self.worktree_add(&path, &branch, true).await?;
        if output.status.success() {
            info!(display_number, path = %path.display(), branch, "Created workspace");
            return Ok(path);
        }

        // The branch may survive from a previous run (resumed task): attach
        // the worktree to it instead of failing outright.
        let retry = self.worktree_add(&path, &branch, false).await?;
        if retry.status.success() {
            info!(display_number, path = %path.display(), branch, "Created workspace on existing branch");
            return Ok(path);
        }

        let stderr = String::from_utf8_lossy(&retry.stderr);
        Err(WorkspaceError::Git(format!(
            "git worktree add failed: {}",
            stderr.trim()
        )))
    }

    /// Run `git worktree add`, with or without creating the branch.
    async fn worktree_add(
        &self,
        path: &Path,
        branch: &str,
        new_branch: bool,
    ) -> Result<std::process::Output, WorkspaceError> {
        let mut cmd = Command::new("git");
        cmd.args(["worktree", "add"]);
        if new_branch {
            cmd.arg("-b").arg(branch);
        }
        cmd.arg(path);
        if !new_branch {
            cmd.arg(branch);
        }
        cmd.current_dir(&self.repo_dir);

        match tokio::time::timeout(GIT_TIMEOUT, cmd.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(WorkspaceError::Timeout(GIT_TIMEOUT)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Initialize a git repo with one commit in a temp directory.
    fn init_repo() -> tempfile::TempDir {
        let repo = tempfile::tempdir().unwrap();

        let status = std::process::Command::new("git")
            .args(["init"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert!(status.status.success(), "git init failed");

        let status = std::process::Command::new("git")
            .args([
                "-c",
                "user.name=push-test",
                "-c",
                "user.email=push-test@example.com",
                "commit",
                "--allow-empty",
                "-m",
                "init",
            ])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert!(status.status.success(), "git commit failed");

        repo
    }

    #[test]
    fn workspace_path_is_deterministic() {
        let mgr = WorkspaceManager::new("/repo".into(), "/workspaces".into());
        assert_eq!(
            mgr.workspace_path(42),
            PathBuf::from("/workspaces/push-42")
        );
        assert_eq!(mgr.workspace_path(42), mgr.workspace_path(42));
    }

    #[test]
    fn branch_name_derived_from_display_number() {
        assert_eq!(WorkspaceManager::branch_name(7), "push-7");
    }

    #[tokio::test]
    async fn ensure_creates_worktree_and_branch() {
        let repo = init_repo();
        let base = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(repo.path().to_path_buf(), base.path().to_path_buf());

        let path = mgr.ensure(42).await.unwrap();
        assert!(path.ends_with("push-42"));
        assert!(path.exists());

        // The worktree sits on its own branch named after the task.
        let output = std::process::Command::new("git")
            .args(["branch", "--show-current"])
            .current_dir(&path)
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&output.stdout).trim(),
            "push-42"
        );
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let repo = init_repo();
        let base = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(repo.path().to_path_buf(), base.path().to_path_buf());

        let first = mgr.ensure(7).await.unwrap();
        let second = mgr.ensure(7).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ensure_attaches_existing_branch() {
        let repo = init_repo();
        let base = tempfile::tempdir().unwrap();

        // Simulate a branch left behind by a previous daemon run.
        let status = std::process::Command::new("git")
            .args(["branch", "push-9"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert!(status.status.success(), "git branch failed");

        let mgr = WorkspaceManager::new(repo.path().to_path_buf(), base.path().to_path_buf());
        let path = mgr.ensure(9).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn ensure_fails_outside_a_repo() {
        let not_a_repo = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let mgr =
            WorkspaceManager::new(not_a_repo.path().to_path_buf(), base.path().to_path_buf());

        let err = mgr.ensure(1).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Git(_)));
    }
}
