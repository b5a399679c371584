//! Admission control and task state transitions.
//!
//! [`Scheduler`] is the only creator of task records. [`TaskLifecycle`]
//! owns every transition after creation, and with it the single point
//! where a quota reservation is released.

mod admission;
mod lifecycle;

pub use admission::{AdmissionError, Scheduler};
pub use lifecycle::{LifecycleError, RecoveryStats, TaskLifecycle};
