use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker.pool_size must be at least 1")]
    EmptyWorkerPool,

    #[error("quota.total_capacity must be positive")]
    ZeroCapacity,

    #[error("quota.default_reservation ({reservation}) exceeds total_capacity ({capacity})")]
    ReservationExceedsCapacity { reservation: u64, capacity: u64 },

    #[error("rate_limit.{field} must be positive")]
    InvalidRateLimit { field: &'static str },

    #[error("{field} must be a positive duration")]
    ZeroDuration { field: &'static str },

    #[error("retention.stale_after ({stale_after}) must exceed worker.execution_timeout ({timeout})")]
    StaleBoundTooShort { stale_after: String, timeout: String },

    #[error("storage.offload with the local provider requires storage.root")]
    MissingStorageRoot,

    #[error("worker.program must not be empty")]
    EmptyProgram,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_worker(config)?;
    validate_quota(config)?;
    validate_rate_limit(config)?;
    validate_retention(config)?;
    validate_storage(config)?;
    Ok(())
}

fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.pool_size == 0 {
        return Err(ValidationError::EmptyWorkerPool);
    }
    if config.worker.program.trim().is_empty() {
        return Err(ValidationError::EmptyProgram);
    }
    if config.worker.execution_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "worker.execution_timeout",
        });
    }
    Ok(())
}

fn validate_quota(config: &Config) -> Result<(), ValidationError> {
    let capacity = config.quota.total_capacity.as_u64();
    let reservation = config.quota.default_reservation.as_u64();

    if capacity == 0 {
        return Err(ValidationError::ZeroCapacity);
    }
    if reservation > capacity {
        return Err(ValidationError::ReservationExceedsCapacity {
            reservation,
            capacity,
        });
    }
    Ok(())
}

fn validate_rate_limit(config: &Config) -> Result<(), ValidationError> {
    if config.rate_limit.max_requests == 0 {
        return Err(ValidationError::InvalidRateLimit {
            field: "max_requests",
        });
    }
    if config.rate_limit.window.is_zero() {
        return Err(ValidationError::InvalidRateLimit { field: "window" });
    }
    Ok(())
}

/// The stale bound must leave room for a run that is merely slow
fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    let retention = &config.retention;

    if retention.terminal_ttl.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "retention.terminal_ttl",
        });
    }
    if retention.sweep_interval.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "retention.sweep_interval",
        });
    }
    if retention.stale_after <= config.worker.execution_timeout {
        return Err(ValidationError::StaleBoundTooShort {
            stale_after: retention.stale_after.to_string(),
            timeout: config.worker.execution_timeout.to_string(),
        });
    }
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.offload
        && config.storage.provider == StorageProvider::Local
        && config.storage.root.is_none()
    {
        return Err(ValidationError::MissingStorageRoot);
    }
    Ok(())
}
