use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::task::TaskId;

/// Ordering key: earliest request first, ties broken by id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    requested_at: DateTime<Utc>,
    id: TaskId,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeSet<QueueEntry>,
    closed: bool,
}

/// In-memory FIFO of admitted task ids shared by every worker slot.
///
/// Unbounded: admission control upstream limits how much can be queued.
#[derive(Debug, Default)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns false when the queue has been closed.
    pub fn push(&self, id: TaskId, requested_at: DateTime<Utc>) -> bool {
        {
            let mut inner = self.inner();
            if inner.closed {
                return false;
            }
            inner.entries.insert(QueueEntry { requested_at, id });
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next id. Returns `None` once closed, even if entries remain.
    pub async fn pop(&self) -> Option<TaskId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.entries.pop_first() {
                    return Some(entry.id);
                }
            }

            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out work. Queued ids stay QUEUED in the store and are
    /// picked up by the next recovery pass.
    pub fn close(&self) {
        self.inner().closed = true;
        self.notify.notify_waiters();
    }
}
