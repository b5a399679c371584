//! Task runner: drives one dequeued task from RUNNING to a terminal state

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::executor::{ExecutionError, Executor};
use crate::artifacts::Artifacts;
use crate::queue::SlotHandler;
use crate::scheduler::TaskLifecycle;
use crate::task::{ErrorKind, Task, TaskId, TaskResult};

pub struct TaskRunner {
    lifecycle: TaskLifecycle,
    executor: Arc<dyn Executor>,
    artifacts: Arc<Artifacts>,
    timeout: Duration,
}

impl TaskRunner {
    pub fn new(
        lifecycle: TaskLifecycle,
        executor: Arc<dyn Executor>,
        artifacts: Arc<Artifacts>,
        timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            executor,
            artifacts,
            timeout,
        }
    }

    /// Run the executor on its own task so a panic or a timeout cannot take
    /// the slot down. Aborting drops the executor future, which kills any
    /// child process it spawned.
    async fn execute(&self, task: &Task) -> TaskResult {
        let destination = match self.artifacts.prepare(&task.id).await {
            Ok(dir) => dir,
            Err(e) => {
                return TaskResult::failure(
                    ErrorKind::Execution,
                    format!("failed to prepare download directory: {e}"),
                );
            }
        };

        let executor = self.executor.clone();
        let request = task.source_request.clone();
        let mut handle = tokio::spawn(async move { executor.execute(&request, &destination).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(ExecutionError::Aborted(join_err.to_string())),
            Err(_) => {
                handle.abort();
                warn!(task_id = %task.id, timeout = ?self.timeout, "Executor timed out, killed");
                Err(ExecutionError::Timeout(self.timeout))
            }
        };

        match outcome {
            Ok(artifact) => {
                debug!(task_id = %task.id, file = %artifact.file_name, size = artifact.size_bytes, "Executor finished");
                TaskResult::Artifact(self.artifacts.publish(&task.id, &artifact).await)
            }
            Err(e) => TaskResult::failure(e.kind(), e.to_string()),
        }
    }
}

#[async_trait]
impl SlotHandler for TaskRunner {
    async fn handle(&self, slot: usize, id: TaskId) {
        let task = match self.lifecycle.start(&id) {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!(slot, task_id = %id, error = %e, "Failed to start task");
                return;
            }
        };

        info!(slot, task_id = %id, url = %task.source_request.url, "Running task");
        let result = self.execute(&task).await;
        let failed = matches!(result, TaskResult::Error(_));

        match self.lifecycle.finish(&id, result) {
            Ok(Some(_)) => {
                if failed {
                    self.artifacts.discard(&id).await;
                }
            }
            Ok(None) => {
                // Swept as stalled while we ran; its artifacts are already released.
                self.artifacts.discard(&id).await;
            }
            Err(e) => {
                error!(slot, task_id = %id, error = %e, "Failed to record task completion");
            }
        }
    }
}
