//! Task execution: the downloader process, the per-slot runner and
//! completion webhooks.

pub mod executor;
pub mod runner;
pub mod webhook;

pub use executor::{ArtifactDescriptor, CommandExecutor, ExecutionError, Executor};
pub use runner::TaskRunner;
pub use webhook::{WebhookClient, WebhookError, WebhookPayload};
