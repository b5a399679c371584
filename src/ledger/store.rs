use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::{debug, info};

use crate::task::{Task, TaskFilter, TaskId};

use super::error::{LedgerError, Result};
use super::partitions::{
    decode_task_key, encode_idem_key, encode_meta_key, encode_task_key, task_range_end,
    task_range_start,
};

/// Number of lock stripes guarding read-modify-write cycles.
const LOCK_STRIPES: usize = 64;

/// Fjall-backed store owning the authoritative copy of every task.
///
/// Updates to one id are serialized through a striped lock; updates to
/// ids in different stripes proceed concurrently.
#[derive(Clone)]
pub struct TaskStore {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    idempotency: PartitionHandle,
    metadata: PartitionHandle,
    stripes: Arc<Vec<Mutex<()>>>,
}

impl TaskStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening task store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        Ok(Self {
            keyspace,
            tasks,
            idempotency,
            metadata,
            stripes: Arc::new(stripes),
        })
    }

    fn lock(&self, id: &TaskId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        // A panic inside a mutator leaves no partial write behind, so the
        // poisoned guard is still usable.
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sync(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn decode(key: &[u8], value: &[u8]) -> Result<Task> {
        serde_json::from_slice(value).map_err(|e| LedgerError::Corrupt {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: e.to_string(),
        })
    }

    /// Insert a new task. Fails with `DuplicateTask` if the id is taken.
    ///
    /// When the task carries an idempotency key the key mapping is written
    /// in the same batch.
    pub fn create(&self, task: &Task) -> Result<TaskId> {
        let _guard = self.lock(&task.id);
        let key = encode_task_key(task.id.as_str());

        if self.tasks.contains_key(&key)? {
            return Err(LedgerError::DuplicateTask(task.id.clone()));
        }

        let value = serde_json::to_vec(task)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, key, value);
        if let Some(idem) = &task.idempotency_key {
            batch.insert(&self.idempotency, encode_idem_key(idem), task.id.as_str());
        }
        batch.commit()?;
        self.sync()?;

        debug!(task_id = %task.id, "Created task record");
        Ok(task.id.clone())
    }

    /// Get a task by id
    pub fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let key = encode_task_key(id.as_str());
        match self.tasks.get(&key)? {
            Some(value) => Ok(Some(Self::decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Atomic read-modify-write of one record.
    ///
    /// The mutator returns `None` to leave the record untouched; nothing is
    /// written in that case. `Some(value)` persists the mutated task and
    /// the value is handed back to the caller.
    pub fn update<T, F>(&self, id: &TaskId, mutator: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Task) -> Option<T>,
    {
        let _guard = self.lock(id);
        let key = encode_task_key(id.as_str());

        let value = self
            .tasks
            .get(&key)?
            .ok_or_else(|| LedgerError::TaskNotFound(id.clone()))?;
        let mut task = Self::decode(&key, &value)?;

        let Some(out) = mutator(&mut task) else {
            return Ok(None);
        };

        if task.id != *id {
            return Err(LedgerError::Corrupt {
                key: id.to_string(),
                reason: "mutator changed the task id".to_string(),
            });
        }

        self.tasks.insert(&key, serde_json::to_vec(&task)?)?;
        self.sync()?;
        Ok(Some(out))
    }

    /// Lazily iterate tasks matching `filter` in id (creation) order.
    ///
    /// The iterator reads a point-in-time view. Resuming with
    /// `filter.after(last_seen_id)` continues where a previous listing
    /// stopped.
    pub fn list(&self, filter: TaskFilter) -> impl Iterator<Item = Result<Task>> + 'static {
        let lower = match &filter.after {
            Some(after) => Bound::Excluded(encode_task_key(after.as_str())),
            None => Bound::Included(task_range_start()),
        };
        let upper = Bound::Excluded(task_range_end());

        self.tasks
            .range((lower, upper))
            .filter_map(move |item| {
                let task = item
                    .map_err(LedgerError::from)
                    .and_then(|(key, value)| Self::decode(&key, &value));
                match task {
                    Ok(task) if filter.matches(&task) => Some(Ok(task)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
    }

    /// Ids of every stored task, used for orphan detection.
    pub fn ids(&self) -> Result<Vec<TaskId>> {
        let mut ids = Vec::new();
        for item in self.tasks.range((
            Bound::Included(task_range_start()),
            Bound::Excluded(task_range_end()),
        )) {
            let (key, _) = item?;
            if let Some(id) = decode_task_key(&key) {
                ids.push(TaskId::from(id));
            }
        }
        Ok(ids)
    }

    /// Remove a task and its idempotency mapping. Missing ids are a no-op.
    pub fn delete(&self, id: &TaskId) -> Result<bool> {
        let _guard = self.lock(id);
        let key = encode_task_key(id.as_str());

        let Some(value) = self.tasks.get(&key)? else {
            return Ok(false);
        };
        let task = Self::decode(&key, &value)?;

        let mut batch = self.keyspace.batch();
        batch.remove(&self.tasks, key);
        if let Some(idem) = &task.idempotency_key {
            batch.remove(&self.idempotency, encode_idem_key(idem));
        }
        batch.commit()?;
        self.sync()?;

        debug!(task_id = %id, "Deleted task record");
        Ok(true)
    }

    /// Look up the task created under an idempotency key
    pub fn get_idempotent(&self, key: &str) -> Result<Option<TaskId>> {
        match self.idempotency.get(encode_idem_key(key))? {
            Some(value) => Ok(Some(TaskId::from(
                String::from_utf8_lossy(&value).into_owned(),
            ))),
            None => Ok(None),
        }
    }

    pub fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.metadata.insert(encode_meta_key(key), value)?;
        self.sync()
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .metadata
            .get(encode_meta_key(key))?
            .map(|value| String::from_utf8_lossy(&value).into_owned()))
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut task_count = 0;
        let mut idem_count = 0;

        for item in self.tasks.iter() {
            item?;
            task_count += 1;
        }

        for item in self.idempotency.iter() {
            item?;
            idem_count += 1;
        }

        Ok(StoreStats {
            task_count,
            idem_count,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub task_count: usize,
    pub idem_count: usize,
}
