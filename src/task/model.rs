use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::request::SourceRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Expired,
}

impl TaskState {
    /// SUCCEEDED or FAILED; only deletion (via EXPIRED) follows.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// States whose tasks hold a quota reservation.
    pub fn holds_reservation(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The downloader reported an error.
    Execution,
    /// The downloader ran past the execution timeout and was killed.
    Timeout,
    /// Found RUNNING past the staleness bound by the sweeper.
    Stalled,
    /// Found RUNNING during the startup recovery pass.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Where a finished artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "snake_case")]
pub enum ArtifactRef {
    /// Served by this process under `/files/`.
    Local { path: String },
    /// Offloaded to object storage.
    Remote { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskResult {
    Artifact(ArtifactRef),
    Error(TaskFailure),
}

impl TaskResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(TaskFailure::new(kind, message))
    }

    /// Terminal state this result leads to.
    pub fn terminal_state(&self) -> TaskState {
        match self {
            Self::Artifact(_) => TaskState::Succeeded,
            Self::Error(_) => TaskState::Failed,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Artifact(_) => None,
            Self::Error(failure) => Some(failure.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookStatus {
    pub delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Bytes reserved in the quota tracker at admission.
    pub resource_reservation: u64,
    #[serde(default)]
    pub result: Option<TaskResult>,
    pub source_request: SourceRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookStatus>,
}

impl Task {
    pub fn queued(
        id: TaskId,
        source_request: SourceRequest,
        resource_reservation: u64,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: TaskState::Queued,
            requested_at,
            started_at: None,
            finished_at: None,
            resource_reservation,
            result: None,
            source_request,
            idempotency_key: None,
            webhook: None,
        }
    }

    /// QUEUED -> RUNNING. Returns false when the task is not QUEUED.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Queued || self.started_at.is_some() {
            return false;
        }
        self.state = TaskState::Running;
        self.started_at = Some(now.max(self.requested_at));
        true
    }

    /// RUNNING -> SUCCEEDED | FAILED. Returns false when the task is not RUNNING.
    pub fn finish(&mut self, result: TaskResult, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Running || self.finished_at.is_some() {
            return false;
        }
        let floor = self.started_at.unwrap_or(self.requested_at);
        self.state = result.terminal_state();
        self.finished_at = Some(now.max(floor));
        self.result = Some(result);
        true
    }

    /// SUCCEEDED | FAILED -> EXPIRED. Returns false for any other state.
    pub fn expire(&mut self) -> bool {
        if !self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Expired;
        true
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().and_then(TaskResult::error_kind)
    }
}

/// Selection used by [`crate::ledger::TaskStore::list`].
///
/// An empty `states` list matches every state. `after` resumes a listing
/// strictly past the given id.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub states: Vec<TaskState>,
    pub finished_before: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub after: Option<TaskId>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn finished_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.finished_before = Some(cutoff);
        self
    }

    pub fn started_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.started_before = Some(cutoff);
        self
    }

    pub fn after(mut self, id: TaskId) -> Self {
        self.after = Some(id);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.states.is_empty() && !self.states.contains(&task.state) {
            return false;
        }
        if let Some(cutoff) = self.finished_before {
            match task.finished_at {
                Some(finished) if finished < cutoff => {}
                _ => return false,
            }
        }
        if let Some(cutoff) = self.started_before {
            match task.started_at {
                Some(started) if started < cutoff => {}
                _ => return false,
            }
        }
        true
    }
}
