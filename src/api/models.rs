//! Wire types for the HTTP surface.
//!
//! All three submission routes accept the same JSON body; the route picks
//! the task kind and decides which fields are required:
//!
//! ```json
//! {
//!   "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
//!   "format": "video",
//!   "video_format": "bestvideo",
//!   "audio_format": "bestaudio",
//!   "quality": "720p",
//!   "start": 600,
//!   "duration": 300,
//!   "webhook_url": "https://client.example.com/hooks/grabbox"
//! }
//! ```
//!
//! `start` and `duration` only apply to `/live`.

use serde::{Deserialize, Serialize};

use crate::observability::MetricsSnapshot;
use crate::task::{MediaType, SourceRequest, TaskId, TaskKind, TaskState};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SubmitRequest {
    #[serde(default)]
    pub url: String,
    /// `video` or `audio`
    #[serde(default)]
    pub format: Option<MediaType>,
    #[serde(default)]
    pub video_format: Option<String>,
    #[serde(default)]
    pub audio_format: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl SubmitRequest {
    /// Only fields meaningful for `kind` are carried over.
    pub fn into_source(self, kind: TaskKind) -> SourceRequest {
        let fetches_media = kind != TaskKind::Info;
        let is_live = kind == TaskKind::Live;
        SourceRequest {
            url: self.url,
            kind,
            media_type: self.format.filter(|_| fetches_media),
            video_format: self.video_format.filter(|_| fetches_media),
            audio_format: self.audio_format.filter(|_| fetches_media),
            quality: self.quality.filter(|_| kind == TaskKind::Download),
            start: is_live.then(|| self.start.unwrap_or(0)),
            duration: self.duration.filter(|_| is_live),
            webhook_url: self.webhook_url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskAcceptedResponse {
    pub task_id: TaskId,
    pub status: TaskState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub capacity: u64,
    pub reserved: u64,
    pub available: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub size: usize,
    pub busy: usize,
    pub queued: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tasks: usize,
    pub quota: QuotaSnapshot,
    pub pool: PoolSnapshot,
    pub counters: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<String>,
}
