//! Process-wide counters, exposed through `/health`

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::ErrorKind;

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    accepted: AtomicU64,
    rate_limited: AtomicU64,
    quota_rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    stalled: AtomicU64,
    interrupted: AtomicU64,
    expired: AtomicU64,
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(counter = name, "Metric incremented");
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_accepted(&self) {
        bump(&self.accepted, "accepted");
    }

    pub fn rate_limited(&self) {
        bump(&self.rate_limited, "rate_limited");
    }

    pub fn quota_rejected(&self) {
        bump(&self.quota_rejected, "quota_rejected");
    }

    pub fn task_succeeded(&self) {
        bump(&self.succeeded, "succeeded");
    }

    /// Every failure counts once in `failed` and once under its kind.
    pub fn task_failed(&self, kind: ErrorKind) {
        bump(&self.failed, "failed");
        match kind {
            ErrorKind::Execution => {}
            ErrorKind::Timeout => bump(&self.timed_out, "timed_out"),
            ErrorKind::Stalled => bump(&self.stalled, "stalled"),
            ErrorKind::Interrupted => bump(&self.interrupted, "interrupted"),
        }
    }

    pub fn task_expired(&self) {
        bump(&self.expired, "expired");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            accepted: load(&self.accepted),
            rate_limited: load(&self.rate_limited),
            quota_rejected: load(&self.quota_rejected),
            succeeded: load(&self.succeeded),
            failed: load(&self.failed),
            timed_out: load(&self.timed_out),
            stalled: load(&self.stalled),
            interrupted: load(&self.interrupted),
            expired: load(&self.expired),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub rate_limited: u64,
    pub quota_rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub stalled: u64,
    pub interrupted: u64,
    pub expired: u64,
}
