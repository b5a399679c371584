use std::sync::Arc;

use crate::artifacts::Artifacts;
use crate::ledger::TaskStore;
use crate::observability::Metrics;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: TaskStore,
    pub artifacts: Arc<Artifacts>,
    pub metrics: Arc<Metrics>,
    pub max_payload_bytes: usize,
}

impl AppState {
    pub fn new(
        scheduler: Arc<Scheduler>,
        store: TaskStore,
        artifacts: Arc<Artifacts>,
        metrics: Arc<Metrics>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            scheduler,
            store,
            artifacts,
            metrics,
            max_payload_bytes,
        }
    }
}
