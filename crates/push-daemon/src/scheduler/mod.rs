//! The scheduler tick loop.
//!
//! One control task drives the daemon: each tick reconciles running agents,
//! fetches queued tasks, dispatches the eligible ones, and publishes a
//! status snapshot. The running-task map lives on the [`Scheduler`] itself
//! and is touched only from this single task, so it needs no locking; it is
//! the sole source of truth for "what is running now" and is never
//! reconstructed from the remote queue.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::pidfile::PidFile;
use crate::queue::{ExecutionStatus, Task, TaskQueue};
use crate::status::{ExecutionSnapshot, SnapshotStats, StatusPublisher, TaskEntry};
use crate::supervisor::{AgentHandle, AgentStatus, AgentSupervisor};
use crate::workspace::WorkspaceManager;

/// How many recently finished tasks the snapshot keeps.
const RECENT_WINDOW: usize = 20;

/// Cap on the stderr excerpt attached to failure reports.
const STDERR_EXCERPT_CHARS: usize = 200;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum simultaneously running agents.
    pub max_concurrent: usize,
    /// Sleep between ticks.
    pub poll_interval: Duration,
    /// Project scope key for fetches, when determinable.
    pub scope: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval: Duration::from_secs(30),
            scope: None,
        }
    }
}

/// A task currently executing under this daemon.
struct RunningTask {
    summary: String,
    handle: AgentHandle,
    workspace: PathBuf,
    started_at: Instant,
}

/// A finished task kept in the rolling completions window.
struct FinishedTask {
    display_number: u64,
    summary: String,
    status: ExecutionStatus,
    duration: Duration,
}

/// The daemon's control loop.
pub struct Scheduler<Q> {
    queue: Q,
    workspaces: WorkspaceManager,
    supervisor: AgentSupervisor,
    publisher: StatusPublisher,
    config: SchedulerConfig,
    pid_file: Option<PidFile>,
    running: HashMap<u64, RunningTask>,
    finished: VecDeque<FinishedTask>,
    completed_count: usize,
}

impl<Q: TaskQueue> Scheduler<Q> {
    /// Create a scheduler over the given collaborators.
    pub fn new(
        queue: Q,
        workspaces: WorkspaceManager,
        supervisor: AgentSupervisor,
        publisher: StatusPublisher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            workspaces,
            supervisor,
            publisher,
            config,
            pid_file: None,
            running: HashMap::new(),
            finished: VecDeque::new(),
            completed_count: 0,
        }
    }

    /// Attach the pid marker so the shutdown sequence removes it.
    #[must_use]
    pub fn with_pid_file(mut self, pid_file: PidFile) -> Self {
        self.pid_file = Some(pid_file);
        self
    }

    /// Number of currently tracked running tasks.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Whether a task is currently tracked as running.
    pub fn is_running(&self, display_number: u64) -> bool {
        self.running.contains_key(&display_number)
    }

    /// Run the loop until the shutdown signal fires, then perform the
    /// shutdown sequence.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent = self.config.max_concurrent,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            scope = ?self.config.scope,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.shutdown().await;
    }

    /// One reconcile-fetch-dispatch-publish cycle.
    ///
    /// Reconciliation strictly precedes dispatch so a task finishing this
    /// tick frees a concurrency slot usable in the same tick.
    pub async fn tick(&mut self) {
        self.reconcile().await;
        let batch = self.fetch().await;
        self.dispatch(batch).await;
        self.publish().await;
    }

    /// Poll every running agent and retire the ones that exited.
    async fn reconcile(&mut self) {
        let ids: Vec<u64> = self.running.keys().copied().collect();
        for display_number in ids {
            let status = match self.running.get_mut(&display_number) {
                Some(task) => task.handle.poll(),
                None => continue,
            };

            match status {
                Ok(AgentStatus::Running) => {}
                Ok(AgentStatus::Exited(code)) => self.retire(display_number, code).await,
                Err(e) => {
                    warn!(display_number, error = %e, "Failed to poll agent process");
                }
            }
        }
    }

    /// Remove a finished task from the running map and report its outcome.
    async fn retire(&mut self, display_number: u64, code: i32) {
        let Some(task) = self.running.remove(&display_number) else {
            return;
        };
        let duration = task.started_at.elapsed();

        if code == 0 {
            // The agent reports its own completion out-of-band before a
            // clean exit; the daemon only retires the entry.
            info!(display_number, elapsed_secs = duration.as_secs(), "Agent exited cleanly");
            self.completed_count += 1;
            self.push_finished(display_number, task.summary, ExecutionStatus::Completed, duration);
        } else {
            let excerpt = task.handle.stderr_excerpt(STDERR_EXCERPT_CHARS);
            let error = format!("Exit code {code}: {excerpt}");
            warn!(display_number, code, "Agent failed");
            self.report(display_number, ExecutionStatus::Failed, None, Some(&error))
                .await;
            self.push_finished(display_number, task.summary, ExecutionStatus::Failed, duration);
        }
    }

    fn push_finished(
        &mut self,
        display_number: u64,
        summary: String,
        status: ExecutionStatus,
        duration: Duration,
    ) {
        self.finished.push_back(FinishedTask {
            display_number,
            summary,
            status,
            duration,
        });
        while self.finished.len() > RECENT_WINDOW {
            self.finished.pop_front();
        }
    }

    /// Best-effort status report; failures are logged, never retried.
    async fn report(
        &self,
        display_number: u64,
        status: ExecutionStatus,
        summary: Option<&str>,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .queue
            .update_status(display_number, status, summary, error)
            .await
        {
            warn!(display_number, status = %status, error = %e, "Failed to report task status");
        }
    }

    /// Pull the current queued tasks. Queue errors never abort the tick.
    async fn fetch(&self) -> Vec<Task> {
        match self.queue.fetch_queued(self.config.scope.as_deref()).await {
            Ok(tasks) => {
                if !tasks.is_empty() {
                    info!(count = tasks.len(), "Fetched queued tasks");
                } else if !self.running.is_empty() {
                    debug!(running = self.running.len(), "No new tasks");
                }
                tasks
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch queued tasks");
                Vec::new()
            }
        }
    }

    /// Dispatch eligible tasks in the order the remote returned them.
    ///
    /// Ineligible tasks are silently skipped this tick and reconsidered on
    /// the next fetch; there is no backoff or aging.
    async fn dispatch(&mut self, batch: Vec<Task>) {
        for task in batch {
            let Some(display_number) = task.display_number else {
                warn!("Task has no display number, skipping");
                continue;
            };

            // The remote status lags local reality: a task we just started
            // may still be listed as queued.
            if self.running.contains_key(&display_number) {
                debug!(display_number, "Task already running, skipping");
                continue;
            }

            if self.running.len() >= self.config.max_concurrent {
                debug!(
                    display_number,
                    max = self.config.max_concurrent,
                    "Concurrency bound reached, deferring"
                );
                continue;
            }

            self.dispatch_one(display_number, &task).await;
        }
    }

    /// Prepare a workspace and launch the agent for one task.
    async fn dispatch_one(&mut self, display_number: u64, task: &Task) {
        let instructions = task.instructions();
        info!(display_number, summary = ?task.summary, "Starting task");

        self.report(display_number, ExecutionStatus::Running, None, None)
            .await;

        let workspace = match self.workspaces.ensure(display_number).await {
            Ok(path) => path,
            Err(e) => {
                warn!(display_number, error = %e, "Workspace creation failed");
                let error = format!("Failed to create workspace: {e}");
                self.report(display_number, ExecutionStatus::Failed, None, Some(&error))
                    .await;
                return;
            }
        };

        let handle = match self.supervisor.launch(display_number, &workspace, instructions) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(display_number, error = %e, "Agent spawn failed");
                self.report(
                    display_number,
                    ExecutionStatus::Failed,
                    None,
                    Some(&e.to_string()),
                )
                .await;
                return;
            }
        };

        // Insert before the next candidate is considered so the eligibility
        // check within this same tick cannot double-dispatch.
        self.running.insert(
            display_number,
            RunningTask {
                summary: summarize(task),
                handle,
                workspace,
                started_at: Instant::now(),
            },
        );
    }

    /// Build the current execution snapshot.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let mut active: Vec<TaskEntry> = self
            .running
            .iter()
            .map(|(display_number, task)| TaskEntry {
                display_number: *display_number,
                summary: task.summary.clone(),
                status: ExecutionStatus::Running,
                elapsed_seconds: Some(task.started_at.elapsed().as_secs()),
                duration_seconds: None,
                detail: Some(task.workspace.display().to_string()),
            })
            .collect();
        active.sort_by_key(|entry| entry.display_number);

        let completed = self
            .finished
            .iter()
            .map(|task| TaskEntry {
                display_number: task.display_number,
                summary: task.summary.clone(),
                status: task.status,
                elapsed_seconds: None,
                duration_seconds: Some(task.duration.as_secs()),
                detail: None,
            })
            .collect();

        ExecutionSnapshot {
            daemon: self.publisher.meta().clone(),
            stats: SnapshotStats {
                running: self.running.len(),
                max_concurrent: self.config.max_concurrent,
                completed_today: self.completed_count,
            },
            active_tasks: active,
            completed_today: completed,
        }
    }

    /// Publish the snapshot; called every tick whether or not state changed.
    async fn publish(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.publisher.publish(&snapshot).await {
            warn!(error = %e, "Failed to publish status snapshot");
        }
    }

    /// Terminate agents, drop the pid marker, publish a final snapshot.
    ///
    /// Termination is signalled, not awaited: agents get a chance to die
    /// cleanly but shutdown never blocks on them.
    async fn shutdown(&mut self) {
        info!(running = self.running.len(), "Scheduler shutting down");

        for (display_number, task) in &mut self.running {
            debug!(display_number = *display_number, "Terminating agent");
            task.handle.terminate();
        }

        if let Some(pid_file) = self.pid_file.take() {
            if let Err(e) = pid_file.release() {
                warn!(error = %e, "Failed to remove pid file");
            }
        }

        self.publish().await;
        info!("Scheduler stopped");
    }
}

/// Short label for a task in logs and the snapshot.
fn summarize(task: &Task) -> String {
    task.summary.clone().unwrap_or_else(|| {
        task.instructions().chars().take(60).collect()
    })
}
