use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use super::{
    error::ApiError,
    models::{HealthResponse, PoolSnapshot, QuotaSnapshot, SubmitRequest, TaskAcceptedResponse},
    state::AppState,
    utils::{IDEMPOTENCY_HEADER, filter_info},
    validation::validate_request,
};
use crate::sweeper::LAST_SWEEP_KEY;
use crate::task::{TaskId, TaskKind, TaskState};
use crate::worker::executor::INFO_FILE;

/// Media download (POST /download)
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    submit(state, headers, body, TaskKind::Download).await
}

/// Metadata extraction (POST /get_info)
pub async fn get_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    submit(state, headers, body, TaskKind::Info).await
}

/// Live stream window recording (POST /live)
pub async fn live(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    submit(state, headers, body, TaskKind::Live).await
}

/// Shared submission path.
///
/// ## Flow:
/// 1. Validate Content-Type, read the body and enforce the size limit
/// 2. Deserialize and validate against the rules for `kind`
/// 3. Hand the request to the scheduler (idempotency, rate, quota, persist, enqueue)
/// 4. Return 202 Accepted with the task id
///
/// Rejections by rate or quota create no task.
async fn submit(
    state: AppState,
    headers: HeaderMap,
    body: Body,
    kind: TaskKind,
) -> Result<(StatusCode, Json<TaskAcceptedResponse>), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);

    let body_bytes = read_body(body, state.max_payload_bytes).await?;
    let payload: SubmitRequest = serde_json::from_slice(&body_bytes)?;

    let request = payload.into_source(kind);
    validate_request(&request).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let task_id = state.scheduler.submit_request(request, idempotency_key)?;

    let response = TaskAcceptedResponse {
        task_id,
        status: TaskState::Queued,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Reads request body and validates size
///
/// Decompression is handled by `RequestDecompressionLayer`, so the limit
/// applies to the decoded payload.
async fn read_body(body: Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(err.to_string()))?
        .to_bytes()
        .to_vec();

    super::utils::validate_body_size(&data, max_size)?;

    Ok(data)
}

/// Task status endpoint (GET /status/{task_id})
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = TaskId::from(task_id);
    let task = state
        .scheduler
        .get_status(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("task {id}")))?;

    Ok((StatusCode::OK, Json(task)))
}

/// Artifact download (GET /files/{*path})
///
/// Any query parameters on an `info.json` request select fields from the
/// document instead of returning it whole.
pub async fn get_file(
    State(state): State<AppState>,
    Path(rel): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = state.artifacts.resolve(&rel).ok_or_else(|| {
        warn!(path = %rel, "Rejected file request outside the download directory");
        ApiError::Forbidden(rel.clone())
    })?;

    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::NotFound(format!("file {rel}")));
    }

    if !params.is_empty() && rel.ends_with(INFO_FILE) {
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to read {rel}: {e}")))?;
        let info: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::Internal(format!("malformed {rel}: {e}")))?;

        return match filter_info(&info, &params) {
            Some(selected) => Ok(Json(selected).into_response()),
            None => Err(ApiError::NotFound("no matching parameters found".into())),
        };
    }

    debug!(path = %path.display(), "Serving artifact");
    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}

/// Health check endpoint (GET /health)
///
/// Reports the quota aggregate, pool occupancy, counters and when the
/// sweeper last ran. Returns 503 if the task store cannot be read.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let quota = state.scheduler.quota();
    let pool = state.scheduler.pool();

    let stats = state.store.stats();
    let last_sweep = state.store.get_meta(LAST_SWEEP_KEY).ok().flatten();

    let (status_code, status, tasks) = match stats {
        Ok(stats) => (StatusCode::OK, "healthy", stats.task_count),
        Err(e) => {
            warn!(error = %e, "Task store unreadable during health check");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", 0)
        }
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        tasks,
        quota: QuotaSnapshot {
            capacity: quota.capacity(),
            reserved: quota.reserved(),
            available: quota.available(),
        },
        pool: PoolSnapshot {
            size: pool.size(),
            busy: pool.busy(),
            queued: pool.queued(),
        },
        counters: state.metrics.snapshot(),
        last_sweep,
    };

    (status_code, Json(response))
}
