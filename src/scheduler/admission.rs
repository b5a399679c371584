use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ledger::{LedgerError, TaskStore};
use crate::observability::Metrics;
use crate::quota::{QuotaTracker, RateLimiter};
use crate::queue::WorkerPool;
use crate::task::{SourceRequest, Task, TaskId};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("rate limit exceeded, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("admission failed: {0}")]
    Internal(#[from] LedgerError),
}

/// Accept-fast front door: rate check, reservation, record, enqueue.
pub struct Scheduler {
    store: TaskStore,
    quota: Arc<QuotaTracker>,
    rate: RateLimiter,
    pool: WorkerPool,
    metrics: Arc<Metrics>,
    reservation: u64,
    /// Serializes keyed submissions so one key maps to one task.
    keyed: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        store: TaskStore,
        quota: Arc<QuotaTracker>,
        rate: RateLimiter,
        pool: WorkerPool,
        metrics: Arc<Metrics>,
        reservation: u64,
    ) -> Self {
        Self {
            store,
            quota,
            rate,
            pool,
            metrics,
            reservation,
            keyed: Mutex::new(()),
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Admit a request and return its id without waiting for it to run.
    ///
    /// With an idempotency key that was already used, the existing id is
    /// returned and neither the rate window nor the quota is touched.
    /// Rejections create no record and leave the quota unchanged.
    pub fn submit_request(
        &self,
        request: SourceRequest,
        idempotency_key: Option<String>,
    ) -> Result<TaskId, AdmissionError> {
        let Some(key) = idempotency_key else {
            return self.admit(request, None);
        };

        let _guard = self.keyed.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = self.store.get_idempotent(&key)? {
            debug!(task_id = %existing, idempotency_key = %key, "Returning existing task");
            return Ok(existing);
        }
        self.admit(request, Some(key))
    }

    fn admit(
        &self,
        request: SourceRequest,
        idempotency_key: Option<String>,
    ) -> Result<TaskId, AdmissionError> {
        if !self.rate.try_acquire() {
            self.metrics.rate_limited();
            let retry_after = self.rate.retry_after();
            warn!(url = %request.url, ?retry_after, "Rejected: rate limited");
            return Err(AdmissionError::RateLimited { retry_after });
        }

        let reservation = self.reservation;
        if !self.quota.reserve(reservation) {
            self.metrics.quota_rejected();
            let available = self.quota.available();
            warn!(url = %request.url, requested = reservation, available, "Rejected: quota exceeded");
            return Err(AdmissionError::QuotaExceeded {
                requested: reservation,
                available,
            });
        }

        let mut task = Task::queued(TaskId::generate(), request, reservation, Utc::now());
        task.idempotency_key = idempotency_key;

        if let Err(e) = self.store.create(&task) {
            error!(task_id = %task.id, error = %e, "Failed to persist admitted task");
            if let Err(release_err) = self.quota.release(reservation) {
                error!(error = %release_err, "Quota release failed while undoing admission");
            }
            return Err(e.into());
        }

        self.pool.submit(task.id.clone(), task.requested_at);
        self.metrics.task_accepted();
        info!(
            task_id = %task.id,
            kind = task.source_request.kind.as_str(),
            reservation,
            "Task admitted"
        );
        Ok(task.id)
    }

    /// Read-through to the store.
    pub fn get_status(&self, id: &TaskId) -> Result<Option<Task>, LedgerError> {
        self.store.get(id)
    }
}
