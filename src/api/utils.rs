//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept apart from
//! the handlers so they can be unit tested.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::api::error::ApiError;

/// Request header carrying a caller-chosen idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Query key that asks for the distinct heights found in `formats`.
const QUALITIES_KEY: &str = "qualities";

/// Parses and validates Content-Type header for application/json
///
/// Accepts:
/// - `application/json`
/// - `application/json; charset=utf-8`
///
/// Rejects:
/// - `application/jsonp`
/// - `application/json-patch+json`
/// - `text/json`
/// - Malformed media types
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// Select top-level fields of an `info.json` document by query key.
///
/// `qualities` is synthesized from the heights listed under `formats`,
/// sorted ascending (`["360p", "720p"]`). Returns `None` when no key matched.
pub fn filter_info(info: &Value, params: &BTreeMap<String, String>) -> Option<Value> {
    let mut selected = Map::new();

    for key in params.keys() {
        if let Some(value) = info.get(key) {
            selected.insert(key.clone(), value.clone());
        } else if key == QUALITIES_KEY {
            selected.insert(key.clone(), qualities(info));
        }
    }

    (!selected.is_empty()).then_some(Value::Object(selected))
}

fn qualities(info: &Value) -> Value {
    let heights: BTreeSet<u64> = info
        .get("formats")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|format| format.get("height").and_then(Value::as_u64))
        .filter(|height| *height > 0)
        .collect();

    Value::Array(
        heights
            .into_iter()
            .map(|h| Value::String(format!("{h}p")))
            .collect(),
    )
}
