use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::ledger::{LedgerError, TaskStore};
use crate::observability::Metrics;
use crate::quota::{QuotaError, QuotaTracker};
use crate::queue::WorkerPool;
use crate::task::{ErrorKind, Task, TaskFilter, TaskId, TaskResult, TaskState, WebhookStatus};
use crate::worker::{WebhookClient, WebhookPayload};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] LedgerError),

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub interrupted: usize,
    pub requeued: usize,
}

/// State transitions after admission, written through the store.
///
/// Every transition into SUCCEEDED or FAILED goes through here, so this is
/// also where the completion webhook is sent from.
#[derive(Clone)]
pub struct TaskLifecycle {
    store: TaskStore,
    quota: Arc<QuotaTracker>,
    metrics: Arc<Metrics>,
    webhook: Option<WebhookClient>,
    deliveries: Arc<Mutex<JoinSet<()>>>,
}

impl TaskLifecycle {
    pub fn new(store: TaskStore, quota: Arc<QuotaTracker>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            quota,
            metrics,
            webhook: None,
            deliveries: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Send completion webhooks with `client`. Without one they are skipped.
    pub fn with_webhook(mut self, client: WebhookClient) -> Self {
        self.webhook = Some(client);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// QUEUED -> RUNNING. `None` when the task is no longer QUEUED.
    pub fn start(&self, id: &TaskId) -> Result<Option<Task>, LifecycleError> {
        let started = self
            .store
            .update(id, |task| task.start(Utc::now()).then(|| task.clone()))?;

        match &started {
            Some(_) => info!(task_id = %id, state = "RUNNING", "Task started"),
            None => debug!(task_id = %id, "Task not queued, skipping start"),
        }
        Ok(started)
    }

    /// RUNNING -> SUCCEEDED | FAILED, then release the reservation.
    ///
    /// The transition is persisted before the release. A task that is not
    /// RUNNING is left alone and nothing is released, so a late completion
    /// racing the sweeper cannot release twice.
    pub fn finish(&self, id: &TaskId, result: TaskResult) -> Result<Option<Task>, LifecycleError> {
        let finished = self
            .store
            .update(id, |task| task.finish(result, Utc::now()).then(|| task.clone()))?;

        let Some(task) = finished else {
            warn!(task_id = %id, "Task already left RUNNING, completion ignored");
            return Ok(None);
        };

        if let Err(e) = self.quota.release(task.resource_reservation) {
            error!(task_id = %id, error = %e, "Quota invariant violated on release");
            return Err(e.into());
        }

        match task.error_kind() {
            None => {
                self.metrics.task_succeeded();
                info!(task_id = %id, state = "SUCCEEDED", "Task finished");
            }
            Some(kind) => {
                self.metrics.task_failed(kind);
                warn!(task_id = %id, state = "FAILED", ?kind, "Task failed");
            }
        }
        self.notify(&task);
        Ok(Some(task))
    }

    /// SUCCEEDED | FAILED -> EXPIRED.
    pub fn expire(&self, id: &TaskId) -> Result<Option<Task>, LifecycleError> {
        let expired = self
            .store
            .update(id, |task| task.expire().then(|| task.clone()))?;
        if expired.is_some() {
            debug!(task_id = %id, state = "EXPIRED", "Task expired");
        }
        Ok(expired)
    }

    /// Record the outcome of the completion webhook. Missing tasks are ignored.
    pub fn record_webhook(&self, id: &TaskId, status: WebhookStatus) -> Result<(), LifecycleError> {
        match self.store.update(id, |task| {
            task.webhook = Some(status);
            Some(())
        }) {
            Ok(_) => Ok(()),
            Err(LedgerError::TaskNotFound(_)) => {
                debug!(task_id = %id, "Task gone before webhook status was recorded");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// POST the finished task to its `webhook_url` in the background and
    /// record the outcome on the task.
    fn notify(&self, task: &Task) {
        let (Some(client), Some(url)) = (&self.webhook, &task.source_request.webhook_url) else {
            return;
        };

        let client = client.clone();
        let url = url.clone();
        let payload = WebhookPayload::from(task);
        let lifecycle = self.clone();
        let id = task.id.clone();

        let mut deliveries = self.deliveries.lock().unwrap_or_else(|p| p.into_inner());
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn(async move {
            let status = match client.deliver(&url, &payload).await {
                Ok(attempts) => {
                    info!(task_id = %id, attempts, "Webhook delivered");
                    WebhookStatus {
                        delivered: true,
                        error: None,
                    }
                }
                Err(e) => WebhookStatus {
                    delivered: false,
                    error: Some(e.to_string()),
                },
            };
            if let Err(e) = lifecycle.record_webhook(&id, status) {
                error!(task_id = %id, error = %e, "Failed to record webhook status");
            }
        });
    }

    /// Wait for every webhook sent so far to be delivered or given up on.
    pub async fn flush_webhooks(&self) {
        let mut pending = {
            let mut deliveries = self.deliveries.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *deliveries)
        };
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Webhook delivery ended abnormally");
            }
        }
    }

    /// Startup pass over whatever the previous process left behind.
    ///
    /// RUNNING tasks lost their executor and become FAILED(Interrupted).
    /// Their reservations died with the old process, so nothing is
    /// released. QUEUED tasks get their reservation restored and go back
    /// into the pool in request order.
    pub fn recover(&self, pool: &WorkerPool) -> Result<RecoveryStats, LifecycleError> {
        let mut stats = RecoveryStats::default();

        let running: Vec<TaskId> = self
            .store
            .list(TaskFilter::in_states([TaskState::Running]))
            .map(|task| task.map(|t| t.id))
            .collect::<Result<_, _>>()?;

        for id in running {
            let interrupted = self.store.update(&id, |task| {
                task.finish(
                    TaskResult::failure(
                        ErrorKind::Interrupted,
                        "process restarted while the task was running",
                    ),
                    Utc::now(),
                )
                .then(|| task.clone())
            })?;
            if let Some(task) = interrupted {
                self.metrics.task_failed(ErrorKind::Interrupted);
                warn!(task_id = %id, "Marked interrupted task as failed");
                self.notify(&task);
                stats.interrupted += 1;
            }
        }

        let queued: Vec<Task> = self
            .store
            .list(TaskFilter::in_states([TaskState::Queued]))
            .collect::<Result<_, _>>()?;

        for task in queued {
            self.quota.restore(task.resource_reservation);
            pool.submit(task.id, task.requested_at);
            stats.requeued += 1;
        }

        info!(
            interrupted = stats.interrupted,
            requeued = stats.requeued,
            reserved = self.quota.reserved(),
            "Recovery pass complete"
        );
        Ok(stats)
    }
}
