//! Push task API client.
//!
//! Authenticated reqwest client for the queue endpoints. Each fetch is
//! authoritative; no task state is cached between calls.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::debug;

use super::TaskQueue;
use super::types::{ExecutionStatus, StatusUpdate, Task, TaskList, UpdateResponse};

/// Queue API client errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication rejected ({status})")]
    Auth { status: u16 },

    #[error("Queue API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for connecting to the task API.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// API base URL (e.g. "<https://api.push.example/functions/v1>").
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
}

/// Timeout applied to every queue call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Authenticated client for the Push task API.
#[derive(Debug)]
pub struct QueueClient {
    http: reqwest::Client,
    base_url: String,
}

impl QueueClient {
    /// Create a new queue API client.
    pub fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        if config.base_url.is_empty() {
            return Err(QueueError::Config("base_url is empty".into()));
        }
        if config.api_key.is_empty() {
            return Err(QueueError::Config("api_key is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let token_val = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| QueueError::Config("Invalid API key format".into()))?;
        headers.insert(AUTHORIZATION, token_val);

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed, safe to ignore.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// Build the URL for a given endpoint.
    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Check HTTP response status, mapping auth rejections and other
    /// non-success codes to typed errors.
    fn check_status(resp: &reqwest::Response) -> Result<(), QueueError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(QueueError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(QueueError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }
}

impl TaskQueue for QueueClient {
    /// Fetch tasks currently queued for execution.
    ///
    /// A 404 means the project is not registered with the backend yet --
    /// treated as an empty queue, not an error.
    async fn fetch_queued(&self, scope: Option<&str>) -> Result<Vec<Task>, QueueError> {
        let url = self.endpoint_url("synced-todos");
        let mut req = self.http.get(&url).query(&[("execution_status", "queued")]);
        if let Some(scope) = scope {
            req = req.query(&[("git_remote", scope)]);
        }

        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(scope = ?scope, "Project not registered, treating as empty queue");
            return Ok(Vec::new());
        }
        Self::check_status(&resp)?;

        let list: TaskList = resp.json().await?;
        Ok(list.todos)
    }

    /// Patch a task's execution status.
    async fn update_status(
        &self,
        display_number: u64,
        status: ExecutionStatus,
        summary: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let url = self.endpoint_url("update-task-execution");
        let payload = StatusUpdate {
            display_number,
            status,
            summary,
            error,
        };

        let resp = self.http.patch(&url).json(&payload).send().await?;
        let http_status = resp.status().as_u16();
        Self::check_status(&resp)?;

        let body: UpdateResponse = resp.json().await?;
        if body.success {
            debug!(display_number, status = %status, "Task status updated");
            Ok(())
        } else {
            Err(QueueError::Api {
                status: http_status,
                message: "update rejected by backend".into(),
            })
        }
    }
}
