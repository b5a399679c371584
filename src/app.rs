//! Wiring of the long-lived components into one service

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::AppState;
use crate::artifacts::Artifacts;
use crate::config::Config;
use crate::ledger::{LedgerError, TaskStore};
use crate::observability::Metrics;
use crate::quota::{QuotaTracker, RateLimiter};
use crate::queue::{PoolHandle, WorkerPool};
use crate::scheduler::{LifecycleError, RecoveryStats, Scheduler, TaskLifecycle};
use crate::storage::{StorageClient, StorageError};
use crate::sweeper::{Sweeper, known_ids};
use crate::worker::{CommandExecutor, Executor, TaskRunner, WebhookClient, WebhookError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("task store: {0}")]
    Ledger(#[from] LedgerError),

    #[error("object storage: {0}")]
    Storage(#[from] StorageError),

    #[error("webhook client: {0}")]
    Webhook(#[from] WebhookError),

    #[error("startup recovery: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub struct App {
    config: Config,
    lifecycle: TaskLifecycle,
    pool: WorkerPool,
    runner: Arc<TaskRunner>,
    sweeper: Arc<Sweeper>,
    state: AppState,
}

impl App {
    /// Open the store and build every component around `executor`.
    /// Nothing runs until [`App::start`].
    pub fn open(config: Config, executor: Arc<dyn Executor>) -> Result<Self, AppError> {
        let store = TaskStore::open(&config.server.data_dir)?;
        let quota = Arc::new(QuotaTracker::new(config.quota.total_capacity.as_u64()));
        let rate = RateLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window.as_duration(),
        );
        let metrics = Arc::new(Metrics::new());
        let pool = WorkerPool::new(config.worker.pool_size);

        let storage = StorageClient::from_config(&config.storage)?;
        let artifacts = Arc::new(Artifacts::new(&config.worker.download_dir, storage));

        let lifecycle = TaskLifecycle::new(store.clone(), quota.clone(), metrics.clone())
            .with_webhook(WebhookClient::new(&config.webhook)?);
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            quota,
            rate,
            pool.clone(),
            metrics.clone(),
            config.quota.default_reservation.as_u64(),
        ));

        let runner = Arc::new(TaskRunner::new(
            lifecycle.clone(),
            executor,
            artifacts.clone(),
            config.worker.execution_timeout.as_duration(),
        ));

        let sweeper = Arc::new(Sweeper::new(
            lifecycle.clone(),
            artifacts.clone(),
            metrics.clone(),
            &config.retention,
        ));

        let state = AppState::new(
            scheduler,
            store,
            artifacts,
            metrics,
            config.server.max_payload_bytes.as_u64() as usize,
        );

        Ok(Self {
            config,
            lifecycle,
            pool,
            runner,
            sweeper,
            state,
        })
    }

    /// Same as [`App::open`] with the configured downloader program.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let executor = Arc::new(CommandExecutor::from_config(&config.worker));
        Self::open(config, executor)
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    /// Bring the quota aggregate and task states in line with the store.
    /// Requeued tasks only run once [`App::start`] spawns the slots.
    pub fn recover(&self) -> Result<RecoveryStats, AppError> {
        Ok(self.lifecycle.recover(&self.pool)?)
    }

    /// Wait for outstanding completion webhooks.
    pub async fn flush_webhooks(&self) {
        self.lifecycle.flush_webhooks().await;
    }

    /// Recover what the previous process left, then start the worker
    /// slots and the sweep timer.
    pub async fn start(&self) -> Result<Background, AppError> {
        let recovered = self.recover()?;

        let store = self.lifecycle.store().clone();
        let orphans = self
            .state
            .artifacts
            .remove_orphans(move || known_ids(&store))
            .await;
        if let Err(e) = orphans {
            warn!(error = %e, "Startup orphan cleanup failed");
        }

        let pool = self.pool.start(self.runner.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = self.sweeper.clone().spawn(
            self.config.retention.sweep_interval.as_duration(),
            shutdown_rx,
        );

        info!(
            slots = self.pool.size(),
            interrupted = recovered.interrupted,
            requeued = recovered.requeued,
            "Background workers started"
        );

        Ok(Background {
            pool,
            sweeper,
            shutdown_tx,
            lifecycle: self.lifecycle.clone(),
        })
    }
}

/// Handles to the running slots and sweep timer.
pub struct Background {
    pool: PoolHandle,
    sweeper: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    lifecycle: TaskLifecycle,
}

impl Background {
    /// Stop the sweeper, let running tasks finish, then wait for their
    /// webhooks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "Sweeper ended abnormally");
        }
        self.pool.shutdown().await;
        self.lifecycle.flush_webhooks().await;
    }
}
