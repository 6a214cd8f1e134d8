//! Project scope detection.
//!
//! Tasks are scoped to the project whose repository the daemon was started
//! in, keyed by the normalized `origin` remote. Outside a repository (or
//! with no remote) the daemon fetches unscoped.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use push_core::remote::normalize_remote_url;

/// Timeout for the git remote lookup.
const GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Detect the scope key for the repository at `dir`.
pub async fn detect(dir: &Path) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(["remote", "get-url", "origin"]).current_dir(dir);

    let output = match tokio::time::timeout(GIT_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(error = %e, "Failed to run git remote lookup");
            return None;
        }
        Err(_) => {
            debug!("Git remote lookup timed out");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() {
        return None;
    }

    Some(normalize_remote_url(&url))
}
