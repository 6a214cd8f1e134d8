//! Agent subprocess lifecycle manager.
//!
//! Runs the Claude Code CLI in headless mode inside a task workspace with a
//! restricted tool allow-list, captures diagnostics, and provides
//! non-blocking liveness polling. The supervisor never waits on a running
//! agent; reaping happens through [`AgentHandle::poll`] once per scheduler
//! tick.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Tool allow-list for agent invocations: file tools and git only, no
/// unrestricted shell.
const ALLOWED_TOOLS: &str = "Read,Edit,Write,Glob,Grep,Bash(git *)";

/// Cap on captured stderr kept in memory for post-mortem diagnostics.
const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;

/// Errors from agent supervision.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to spawn agent process: {reason}")]
    Spawn { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Liveness state of a supervised agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Still executing.
    Running,
    /// Exited with the given code; signal deaths are reported as -1.
    Exited(i32),
}

/// Handle to a running agent process.
///
/// Owns the child exclusively. Dropping the handle does not kill the agent;
/// termination is explicit and only happens during daemon shutdown.
#[derive(Debug)]
pub struct AgentHandle {
    display_number: u64,
    child: Child,
    pid: Option<u32>,
    stderr: Arc<Mutex<String>>,
}

impl AgentHandle {
    /// Display number of the task this agent is executing.
    pub const fn display_number(&self) -> u64 {
        self.display_number
    }

    /// OS process id, if the process has not been reaped yet.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check.
    pub fn poll(&mut self) -> Result<AgentStatus, SupervisorError> {
        match self.child.try_wait()? {
            None => Ok(AgentStatus::Running),
            Some(status) => Ok(AgentStatus::Exited(status.code().unwrap_or(-1))),
        }
    }

    /// Send a graceful termination signal. Best-effort and not awaited;
    /// used only during daemon shutdown.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                debug!(
                    display_number = self.display_number,
                    pid, "Sending SIGTERM to agent"
                );
                // SAFETY: pid is a valid process ID obtained from our own
                // Child handle. kill(2) with SIGTERM is safe to call on any
                // owned subprocess.
                #[allow(unsafe_code)]
                #[allow(clippy::cast_possible_wrap)]
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    let err = std::io::Error::last_os_error();
                    warn!(
                        display_number = self.display_number,
                        pid, error = %err, "Failed to send SIGTERM"
                    );
                }
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = self.child.start_kill() {
                warn!(
                    display_number = self.display_number,
                    error = %e, "Failed to kill agent process"
                );
            }
        }
    }

    /// Bounded prefix of the captured stderr, for failure reports.
    pub fn stderr_excerpt(&self, limit: usize) -> String {
        let captured = self.stderr.lock().map(|buf| buf.clone()).unwrap_or_default();
        captured.chars().take(limit).collect::<String>().trim().to_string()
    }
}

/// Launches agent CLI processes, one per task.
#[derive(Debug, Clone)]
pub struct AgentSupervisor {
    agent_bin: PathBuf,
}

impl AgentSupervisor {
    /// Create a supervisor that launches the given agent binary.
    pub const fn new(agent_bin: PathBuf) -> Self {
        Self { agent_bin }
    }

    /// Build the driving prompt for a task.
    pub fn build_prompt(display_number: u64, instructions: &str) -> String {
        format!(
            "Work on Push task #{display_number}:\n\n\
             {instructions}\n\n\
             IMPORTANT: When you're done, the SessionEnd hook will automatically report completion to the Push backend.\n\n\
             If you need to understand the codebase, start by reading the CLAUDE.md file if it exists."
        )
    }

    /// Spawn the agent for a task.
    ///
    /// Non-blocking: the process runs asynchronously with the workspace as
    /// its working directory and is reaped via [`AgentHandle::poll`].
    pub fn launch(
        &self,
        display_number: u64,
        workspace: &Path,
        instructions: &str,
    ) -> Result<AgentHandle, SupervisorError> {
        let prompt = Self::build_prompt(display_number, instructions);

        let mut cmd = Command::new(&self.agent_bin);
        cmd.current_dir(workspace)
            .arg("-p")
            .arg(&prompt)
            .arg("--allowedTools")
            .arg(ALLOWED_TOOLS)
            .arg("--output-format")
            .arg("json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Ensure essential env vars reach the agent even when the daemon
        // runs under a service manager with a stripped environment.
        for key in ["HOME", "PATH", "ANTHROPIC_API_KEY"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        info!(display_number, workspace = %workspace.display(), "Spawning agent process");
        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn {
            reason: e.to_string(),
        })?;
        let pid = child.id();

        // Drain stdout so the agent never blocks on a full pipe; the content
        // is only interesting at debug level.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(display_number, "agent stdout: {}", line);
                }
            });
        }

        // Capture a bounded amount of stderr for post-mortem diagnostics.
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(display_number, "agent stderr: {}", line);
                    if let Ok(mut captured) = buf.lock()
                        && captured.len() < STDERR_CAPTURE_LIMIT
                    {
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                }
            });
        }

        info!(display_number, pid = ?pid, "Agent process started");

        Ok(AgentHandle {
            display_number,
            child,
            pid,
            stderr: stderr_buf,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Write an executable stub standing in for the agent CLI.
    #[cfg(unix)]
    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("agent-stub.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    async fn wait_exit(handle: &mut AgentHandle) -> i32 {
        for _ in 0..200 {
            if let AgentStatus::Exited(code) = handle.poll().unwrap() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("agent did not exit in time");
    }

    #[test]
    fn prompt_contains_task_number_and_instructions() {
        let prompt = AgentSupervisor::build_prompt(42, "Fix the login bug");
        assert!(prompt.contains("task #42"));
        assert!(prompt.contains("Fix the login bug"));
    }

    #[tokio::test]
    async fn launch_nonexistent_binary_is_spawn_error() {
        let supervisor = AgentSupervisor::new("/nonexistent/agent-bin".into());
        let tmp = tempfile::tempdir().unwrap();

        let err = supervisor.launch(1, tmp.path(), "noop").unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_observed_as_code_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let stub = write_stub(tmp.path(), "exit 0");
        let supervisor = AgentSupervisor::new(stub);

        let mut handle = supervisor.launch(1, tmp.path(), "noop").unwrap();
        assert_eq!(wait_exit(&mut handle).await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_exit_code_and_stderr_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let stub = write_stub(tmp.path(), "echo boom >&2\nexit 3");
        let supervisor = AgentSupervisor::new(stub);

        let mut handle = supervisor.launch(2, tmp.path(), "noop").unwrap();
        assert_eq!(wait_exit(&mut handle).await, 3);

        // Give the stderr reader task a moment to drain the pipe.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.stderr_excerpt(200).contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_excerpt_is_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let stub = write_stub(
            tmp.path(),
            "i=0\nwhile [ $i -lt 100 ]; do echo 'a long diagnostic line' >&2; i=$((i+1)); done\nexit 1",
        );
        let supervisor = AgentSupervisor::new(stub);

        let mut handle = supervisor.launch(3, tmp.path(), "noop").unwrap();
        assert_eq!(wait_exit(&mut handle).await, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.stderr_excerpt(200).chars().count() <= 200);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_a_long_running_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let stub = write_stub(tmp.path(), "sleep 30");
        let supervisor = AgentSupervisor::new(stub);

        let mut handle = supervisor.launch(4, tmp.path(), "noop").unwrap();
        assert_eq!(handle.poll().unwrap(), AgentStatus::Running);

        handle.terminate();
        let code = wait_exit(&mut handle).await;
        assert_ne!(code, 0);
    }
}
