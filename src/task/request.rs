use bon::Builder;
use serde::{Deserialize, Serialize};

/// What the external downloader is asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fetch the media itself.
    #[default]
    Download,
    /// Extract metadata only (`info.json`).
    Info,
    /// Record a window of a live stream.
    Live,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Download => "download",
            TaskKind::Info => "info",
            TaskKind::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Audio,
}

/// Caller-supplied parameters, immutable once the task exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct SourceRequest {
    #[builder(into)]
    pub url: String,
    #[builder(default)]
    #[serde(default)]
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_format: Option<String>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<String>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Live only: seconds back from "now" where recording begins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// Live only: seconds to record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl SourceRequest {
    pub fn is_video(&self) -> bool {
        self.media_type != Some(MediaType::Audio)
    }
}
