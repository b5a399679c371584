use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::task::TaskId;

use super::pending::PendingQueue;

/// Runs one dequeued task to completion on behalf of a slot.
#[async_trait]
pub trait SlotHandler: Send + Sync + 'static {
    async fn handle(&self, slot: usize, id: TaskId);
}

/// Fixed number of execution slots pulling from one shared queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    queue: Arc<PendingQueue>,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            queue: Arc::new(PendingQueue::new()),
            busy: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Enqueue an admitted task. Never blocks.
    pub fn submit(&self, id: TaskId, requested_at: DateTime<Utc>) {
        debug!(task_id = %id, "Submitting task to worker pool");
        if !self.queue.push(id.clone(), requested_at) {
            warn!(task_id = %id, "Worker pool closed, task stays queued until restart");
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Spawn the slot loops.
    pub fn start<H: SlotHandler>(&self, handler: Arc<H>) -> PoolHandle {
        info!(slots = self.size, "Starting worker pool");

        let slots = (0..self.size)
            .map(|slot| {
                let queue = self.queue.clone();
                let busy = self.busy.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    while let Some(id) = queue.pop().await {
                        busy.fetch_add(1, Ordering::Relaxed);
                        debug!(slot, task_id = %id, "Slot picked up task");
                        handler.handle(slot, id).await;
                        busy.fetch_sub(1, Ordering::Relaxed);
                    }
                    debug!(slot, "Slot stopped");
                })
            })
            .collect();

        PoolHandle {
            queue: self.queue.clone(),
            slots,
        }
    }
}

/// Owns the spawned slot loops.
pub struct PoolHandle {
    queue: Arc<PendingQueue>,
    slots: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Stop dequeuing and wait for running tasks to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        for slot in self.slots {
            if let Err(e) = slot.await {
                warn!(error = %e, "Worker slot ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(usize, TaskId)>>,
    }

    #[async_trait]
    impl SlotHandler for Recorder {
        async fn handle(&self, slot: usize, id: TaskId) {
            self.seen.lock().unwrap().push((slot, id));
        }
    }

    #[tokio::test]
    async fn single_slot_runs_in_fifo_order() {
        let pool = WorkerPool::new(1);
        let t0 = Utc::now();
        pool.submit(TaskId::new("b"), t0 + chrono::Duration::seconds(1));
        pool.submit(TaskId::new("a"), t0);
        pool.submit(TaskId::new("c"), t0 + chrono::Duration::seconds(2));

        let recorder = Arc::new(Recorder::default());
        let handle = pool.start(recorder.clone());

        for _ in 0..100 {
            if recorder.seen.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        let order: Vec<_> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id)| id.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped() {
        let pool = WorkerPool::new(2);
        let handle = pool.start(Arc::new(Recorder::default()));
        handle.shutdown().await;

        pool.submit(TaskId::new("after"), Utc::now());
        assert_eq!(pool.busy(), 0);
        assert_eq!(pool.queued(), 0);
    }
}
