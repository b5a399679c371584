use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use crate::ledger::LedgerError;
use crate::scheduler::AdmissionError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("rate limit exceeded, retry in {}s", .0.as_secs().max(1))]
    RateLimited(Duration),
    #[error("storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::QuotaExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let retry_after = match &self {
            ApiError::RateLimited(wait) => Some(wait.as_secs().max(1)),
            _ => None,
        };
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        let mut response = (status, Json(json!(body))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<AdmissionError> for ApiError {
    fn from(value: AdmissionError) -> Self {
        match value {
            AdmissionError::RateLimited { retry_after } => ApiError::RateLimited(retry_after),
            AdmissionError::QuotaExceeded {
                requested,
                available,
            } => ApiError::QuotaExceeded {
                requested,
                available,
            },
            AdmissionError::Internal(e) => e.into(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        error!(error = %value, "Task store failure while serving request");
        ApiError::Internal(value.to_string())
    }
}
