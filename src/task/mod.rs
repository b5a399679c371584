//! Task records and their lifecycle rules
//!
//! A [`Task`] is created `QUEUED` at admission and moves strictly forward:
//! `QUEUED -> RUNNING -> SUCCEEDED | FAILED -> EXPIRED`. The transition
//! methods on [`Task`] refuse anything else, so callers can treat a `false`
//! return as "someone else already moved this task".

mod ids;
mod model;
mod request;

pub use ids::TaskId;
pub use model::{
    ArtifactRef, ErrorKind, Task, TaskFailure, TaskFilter, TaskResult, TaskState, WebhookStatus,
};
pub use request::{MediaType, SourceRequest, TaskKind};
