/// Key layout for the fjall partitions.
///
/// Task ids are UUIDv7 strings, so byte order over `task:` keys is
/// creation order.

const TASK_PREFIX: &str = "task:";

/// Encode a task key: task:{id}
pub fn encode_task_key(id: &str) -> Vec<u8> {
    format!("{TASK_PREFIX}{id}").into_bytes()
}

/// Decode a task key: task:{id} -> id
pub fn decode_task_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix(TASK_PREFIX).map(String::from)
}

/// Inclusive lower bound of the task key space.
pub fn task_range_start() -> Vec<u8> {
    TASK_PREFIX.as_bytes().to_vec()
}

/// Exclusive upper bound of the task key space (`;` follows `:`).
pub fn task_range_end() -> Vec<u8> {
    b"task;".to_vec()
}

/// Encode an idempotency key: idem:{key}
pub fn encode_idem_key(key: &str) -> Vec<u8> {
    format!("idem:{}", key).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
