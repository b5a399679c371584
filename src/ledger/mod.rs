//! Durable task records on top of fjall.
//!
//! Every mutation is synced to disk before the call returns, so a task
//! that a caller has seen in a given state survives a process crash in
//! that state.
//!
//! Partitions:
//!
//! - `tasks`: `task:{id}` -> [`Task`](crate::task::Task) as JSON
//! - `idempotency`: `idem:{key}` -> task id
//! - `metadata`: `meta:{key}` -> opaque string

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{StoreStats, TaskStore};
