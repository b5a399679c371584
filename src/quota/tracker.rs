use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    /// Releasing more than is reserved means some reservation was released twice.
    #[error("quota double release: releasing {amount} with only {reserved} reserved")]
    DoubleRelease { amount: u64, reserved: u64 },
}

/// Aggregate of live reservations against a fixed byte capacity.
///
/// `reserved()` always equals the sum of `resource_reservation` over tasks
/// that are QUEUED or RUNNING.
#[derive(Debug)]
pub struct QuotaTracker {
    capacity: u64,
    reserved: AtomicU64,
}

impl QuotaTracker {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            reserved: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.reserved())
    }

    /// Reserve `amount` if it fits under the capacity. No side effect on failure.
    pub fn reserve(&self, amount: u64) -> bool {
        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(amount) else {
                return false;
            };
            if next > self.capacity {
                return false;
            }
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Re-establish a reservation recovered from the store, skipping the
    /// capacity check. Only used by the startup recovery pass.
    pub fn restore(&self, amount: u64) {
        self.reserved.fetch_add(amount, Ordering::AcqRel);
    }

    /// Return `amount` to the pool. The aggregate is left untouched when the
    /// release would take it below zero.
    pub fn release(&self, amount: u64) -> Result<(), QuotaError> {
        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_sub(amount) else {
                error!(amount, reserved = current, "Quota release below zero");
                return Err(QuotaError::DoubleRelease {
                    amount,
                    reserved: current,
                });
            };
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}
