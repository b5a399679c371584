//! Completion notifications POSTed to a caller-supplied URL

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::WebhookConfig;
use crate::task::{Task, TaskKind, TaskResult, TaskState};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Webhook timed out")]
    Timeout,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub task_id: String,
    pub status: TaskState,
    pub kind: TaskKind,
    pub url: String,
    pub result: Option<TaskResult>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Task> for WebhookPayload {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            status: task.state,
            kind: task.source_request.kind,
            url: task.source_request.url.clone(),
            result: task.result.clone(),
            finished_at: task.finished_at,
        }
    }
}

/// Webhook sender with bounded retries
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    max_retries: u32,
    backoff: Duration,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout.as_duration())
            .user_agent(concat!("grabbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            backoff: config.backoff.as_duration(),
        })
    }

    /// POST the payload, retrying with exponential backoff. Returns the
    /// number of attempts used on success.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<u32> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_once(url, payload).await {
                Ok(()) => {
                    debug!(url, attempts, task_id = %payload.task_id, "Webhook delivered");
                    return Ok(attempts);
                }
                Err(e) => {
                    if attempts >= self.max_retries {
                        warn!(url, attempts, error = %e, "Webhook failed after retries");
                        return Err(e);
                    }

                    warn!(url, attempts, error = %e, "Webhook failed, retrying");

                    // backoff, 2x backoff, 4x backoff, ...
                    let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempts - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_once(&self, url: &str, payload: &WebhookPayload) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebhookError::Timeout
                } else {
                    WebhookError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;
    use crate::task::{ArtifactRef, SourceRequest, TaskId};

    #[test]
    fn test_payload_from_finished_task() {
        let now = Utc::now();
        let mut task = Task::queued(
            TaskId::new("t1"),
            SourceRequest::builder()
                .url("https://example.com/v")
                .webhook_url("https://hooks.example.com/done")
                .build(),
            1,
            now,
        );
        task.start(now);
        task.finish(
            TaskResult::Artifact(ArtifactRef::Remote {
                url: "memory://grabbox/t1/video.mp4".into(),
            }),
            now,
        );

        let json = serde_json::to_value(WebhookPayload::from(&task)).unwrap();
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["status"], "SUCCEEDED");
        assert_eq!(json["kind"], "download");
        assert_eq!(json["result"]["url"], "memory://grabbox/t1/video.mp4");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        let client = WebhookClient::new(&WebhookConfig {
            timeout: HumanDuration::from_millis(200),
            max_retries: 2,
            backoff: HumanDuration::from_millis(1),
        })
        .unwrap();

        let payload = WebhookPayload {
            task_id: "t".into(),
            status: TaskState::Failed,
            kind: TaskKind::Download,
            url: "https://example.com".into(),
            result: None,
            finished_at: None,
        };

        // Port 9 (discard) on localhost refuses connections.
        let result = client.deliver("http://127.0.0.1:9/hook", &payload).await;
        assert!(result.is_err());
    }
}
