#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use grabbox::app::App;
use grabbox::config::{ByteSize, Config, HumanDuration};
use grabbox::ledger::TaskStore;
use grabbox::task::{SourceRequest, Task, TaskFailure, TaskId, TaskResult, TaskState};
use grabbox::worker::{ArtifactDescriptor, ExecutionError, Executor};

/// In-process stand-in for the downloader, driven by the request URL:
///
/// - `.../block...` never finishes
/// - `.../gate...` waits for a permit from [`ScriptedExecutor::open_gate`]
/// - `.../fail...` exits with a downloader-style error
/// - anything else writes `media.mp4` immediately
pub struct ScriptedExecutor {
    gate: Semaphore,
    started: AtomicUsize,
}

pub const FAILURE_TEXT: &str = "ERROR: [generic] Unsupported URL: https://example.com/fail";

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        })
    }

    pub fn open_gate(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        request: &SourceRequest,
        destination: &Path,
    ) -> Result<ArtifactDescriptor, ExecutionError> {
        self.started.fetch_add(1, Ordering::SeqCst);

        if request.url.contains("/block") {
            std::future::pending::<()>().await;
        }
        if request.url.contains("/gate") {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| ExecutionError::Aborted(e.to_string()))?;
            permit.forget();
        }
        if request.url.contains("/fail") {
            return Err(ExecutionError::Failed {
                code: Some(1),
                message: FAILURE_TEXT.to_string(),
            });
        }

        let path = destination.join("media.mp4");
        tokio::fs::write(&path, b"not really an mp4").await?;
        ArtifactDescriptor::from_path(path).await
    }
}

/// Config rooted in `temp` with small limits suitable for tests.
pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.server.data_dir = temp.path().join("ledger");
    config.worker.download_dir = temp.path().join("downloads");
    config.worker.pool_size = 2;
    config.worker.execution_timeout = HumanDuration::from_secs(30);
    config.quota.total_capacity = ByteSize(10);
    config.quota.default_reservation = ByteSize(1);
    config.rate_limit.max_requests = 100;
    config.webhook.max_retries = 0;
    config
}

pub fn open_app(config: Config, executor: Arc<ScriptedExecutor>) -> App {
    App::open(config, executor).unwrap()
}

pub fn request(url: &str) -> SourceRequest {
    SourceRequest::builder()
        .url(url)
        .media_type(grabbox::task::MediaType::Video)
        .build()
}

/// Poll until the task satisfies `done`, or panic after `limit`.
pub async fn wait_for(
    store: &TaskStore,
    id: &TaskId,
    limit: Duration,
    done: impl Fn(&Task) -> bool,
) -> Task {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Some(task) = store.get(id).unwrap() {
            if done(&task) {
                return task;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "task {id} did not reach the expected state, last seen: {:?}",
                store.get(id).unwrap().map(|t| t.state)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(
    store: &TaskStore,
    id: &TaskId,
    state: TaskState,
    limit: Duration,
) -> Task {
    wait_for(store, id, limit, |task| task.state == state).await
}

/// Sum of reservations held by QUEUED and RUNNING records.
pub fn held_reservations(store: &TaskStore) -> u64 {
    store
        .list(grabbox::task::TaskFilter::in_states([
            TaskState::Queued,
            TaskState::Running,
        ]))
        .map(|task| task.unwrap().resource_reservation)
        .sum()
}

pub fn failure_of(task: &Task) -> TaskFailure {
    match &task.result {
        Some(TaskResult::Error(failure)) => failure.clone(),
        other => panic!("task {} has no failure: {other:?}", task.id),
    }
}
