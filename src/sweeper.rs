//! Periodic reclamation of finished, orphaned and expired tasks.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::artifacts::Artifacts;
use crate::config::RetentionConfig;
use crate::ledger::TaskStore;
use crate::observability::Metrics;
use crate::scheduler::{LifecycleError, TaskLifecycle};
use crate::task::{ErrorKind, Task, TaskFilter, TaskId, TaskResult, TaskState};

/// Metadata key recording when the last pass finished.
pub const LAST_SWEEP_KEY: &str = "last_sweep";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Records deleted this pass.
    pub deleted: usize,
    /// RUNNING tasks marked FAILED(Stalled) this pass.
    pub stalled: usize,
    pub orphaned_dirs: usize,
}

pub struct Sweeper {
    lifecycle: TaskLifecycle,
    artifacts: Arc<Artifacts>,
    metrics: Arc<Metrics>,
    terminal_ttl: chrono::Duration,
    stale_after: chrono::Duration,
}

impl Sweeper {
    pub fn new(
        lifecycle: TaskLifecycle,
        artifacts: Arc<Artifacts>,
        metrics: Arc<Metrics>,
        retention: &RetentionConfig,
    ) -> Self {
        Self {
            lifecycle,
            artifacts,
            metrics,
            terminal_ttl: retention.terminal_ttl.as_chrono(),
            stale_after: retention.stale_after.as_chrono(),
        }
    }

    fn store(&self) -> &TaskStore {
        self.lifecycle.store()
    }

    /// Ids are gathered up front so no listing is held across an await.
    fn collect_ids(
        &self,
        filter: TaskFilter,
        keep: impl Fn(&Task) -> bool,
    ) -> Result<Vec<TaskId>, LifecycleError> {
        let mut ids = Vec::new();
        for task in self.store().list(filter) {
            let task = task?;
            if keep(&task) {
                ids.push(task.id);
            }
        }
        Ok(ids)
    }

    /// One pass. QUEUED tasks are never touched, and RUNNING tasks only once
    /// they exceed the staleness bound.
    ///
    /// Stalled tasks are marked FAILED in one pass and deleted in the next.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepStats, LifecycleError> {
        let mut stats = SweepStats::default();

        // EXPIRED records left by a pass that died before deleting them.
        let leftovers = self.collect_ids(TaskFilter::in_states([TaskState::Expired]), |_| true)?;

        let terminal_cutoff = cutoff(now, self.terminal_ttl);
        let eligible = self.collect_ids(
            TaskFilter::in_states([TaskState::Succeeded, TaskState::Failed]),
            |task| {
                task.finished_at.is_some_and(|at| at < terminal_cutoff)
                    || task.error_kind() == Some(ErrorKind::Stalled)
            },
        )?;

        let stale = self.collect_ids(
            TaskFilter::in_states([TaskState::Running]).started_before(cutoff(now, self.stale_after)),
            |_| true,
        )?;

        for id in leftovers {
            self.artifacts.release(&id).await;
            if self.store().delete(&id)? {
                stats.deleted += 1;
            }
        }

        for id in eligible {
            // Durable EXPIRED first, so a crash mid-way is finished next pass.
            if self.lifecycle.expire(&id)?.is_none() {
                continue;
            }
            self.artifacts.release(&id).await;
            if self.store().delete(&id)? {
                self.metrics.task_expired();
                stats.deleted += 1;
            }
        }

        for id in stale {
            let failure = TaskResult::failure(
                ErrorKind::Stalled,
                format!("no completion within {}", format_duration(self.stale_after)),
            );
            if self.lifecycle.finish(&id, failure)?.is_some() {
                stats.stalled += 1;
            }
        }

        let store = self.store().clone();
        match self
            .artifacts
            .remove_orphans(move || known_ids(&store))
            .await
        {
            Ok(orphans) => stats.orphaned_dirs = orphans.directories,
            Err(e) => error!(error = %e, "Orphan cleanup failed"),
        }

        self.store().put_meta(LAST_SWEEP_KEY, &now.to_rfc3339())?;

        if stats != SweepStats::default() {
            info!(
                deleted = stats.deleted,
                stalled = stats.stalled,
                orphaned_dirs = stats.orphaned_dirs,
                "Sweep pass complete"
            );
        } else {
            debug!("Sweep pass found nothing to do");
        }
        Ok(stats)
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?interval, "Cleanup sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            error!(error = %e, "Sweep pass failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Cleanup sweeper stopped");
        })
    }
}

pub(crate) fn known_ids(store: &TaskStore) -> io::Result<HashSet<TaskId>> {
    store
        .ids()
        .map(|ids| ids.into_iter().collect())
        .map_err(io::Error::other)
}

/// `now - age`, or the earliest representable instant when that underflows.
fn cutoff(now: DateTime<Utc>, age: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn format_duration(d: chrono::Duration) -> String {
    match d.to_std() {
        Ok(std) => crate::humanize::HumanDuration::from(std).to_string(),
        Err(_) => format!("{}s", d.num_seconds()),
    }
}
