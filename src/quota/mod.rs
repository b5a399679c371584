//! Admission-time resource accounting.

mod rate;
mod tracker;

pub use rate::RateLimiter;
pub use tracker::{QuotaError, QuotaTracker};
