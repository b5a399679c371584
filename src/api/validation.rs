use thiserror::Error;

use crate::task::{SourceRequest, TaskKind};

const MAX_URL_LEN: usize = 2048;

/// Upper bound for both `start` and `duration` of a live recording.
pub const MAX_LIVE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("url is required")]
    MissingUrl,
    #[error("url must be an http/https url of at most {MAX_URL_LEN} bytes")]
    InvalidUrl,
    #[error("format is required (video or audio)")]
    MissingFormat,
    #[error("duration must be a positive number of seconds")]
    InvalidDuration,
    #[error("start and duration must each be at most {MAX_LIVE_WINDOW_SECS} seconds")]
    LiveWindowTooLong,
    #[error("webhook_url must be an http/https url")]
    InvalidWebhookUrl,
}

fn is_http_url(url: &str) -> bool {
    url.len() <= MAX_URL_LEN
        && ["http://", "https://"]
            .iter()
            .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme))
}

pub fn validate_request(request: &SourceRequest) -> Result<(), RequestValidationError> {
    if request.url.trim().is_empty() {
        return Err(RequestValidationError::MissingUrl);
    }

    if !is_http_url(&request.url) {
        return Err(RequestValidationError::InvalidUrl);
    }

    if request.kind != TaskKind::Info && request.media_type.is_none() {
        return Err(RequestValidationError::MissingFormat);
    }

    if request.kind == TaskKind::Live && !request.duration.is_some_and(|d| d > 0) {
        return Err(RequestValidationError::InvalidDuration);
    }

    if [request.start, request.duration]
        .into_iter()
        .flatten()
        .any(|secs| secs > MAX_LIVE_WINDOW_SECS)
    {
        return Err(RequestValidationError::LiveWindowTooLong);
    }

    if let Some(webhook) = &request.webhook_url {
        if !is_http_url(webhook) {
            return Err(RequestValidationError::InvalidWebhookUrl);
        }
    }

    Ok(())
}
