use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::WorkerConfig;
use crate::task::{ErrorKind, SourceRequest, TaskKind};

/// File written for `info` tasks.
pub const INFO_FILE: &str = "info.json";

const DEFAULT_QUALITY: &str = "360p";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Downloader exited unsuccessfully; `message` is its stderr verbatim.
    #[error("{message}")]
    Failed { code: Option<i32>, message: String },

    #[error("downloader finished without producing a file")]
    NoArtifact,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("executor aborted: {0}")]
    Aborted(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Execution,
        }
    }
}

/// The file a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

impl ArtifactDescriptor {
    pub async fn from_path(path: PathBuf) -> Result<Self, ExecutionError> {
        let size_bytes = tokio::fs::metadata(&path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(ExecutionError::NoArtifact)?;
        Ok(Self {
            path,
            file_name,
            size_bytes,
        })
    }
}

/// Performs one fetch into `destination`, which exists and is empty.
///
/// Dropping the returned future must stop any work it started.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(
        &self,
        request: &SourceRequest,
        destination: &Path,
    ) -> Result<ArtifactDescriptor, ExecutionError>;
}

/// Runs an external yt-dlp compatible downloader.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    extra_args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.program.clone(), config.extra_args.clone())
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(
        &self,
        request: &SourceRequest,
        destination: &Path,
    ) -> Result<ArtifactDescriptor, ExecutionError> {
        let args = build_args(request, destination, &self.extra_args, Utc::now().timestamp());
        trace!(program = %self.program, ?args, "spawn");

        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                match output.status.code() {
                    Some(code) => format!("downloader exited with code {code}"),
                    None => "downloader terminated by signal".to_string(),
                }
            } else {
                stderr
            };
            return Err(ExecutionError::Failed {
                code: output.status.code(),
                message,
            });
        }

        if request.kind == TaskKind::Info {
            let path = destination.join(INFO_FILE);
            tokio::fs::write(&path, &output.stdout).await?;
            return ArtifactDescriptor::from_path(path).await;
        }

        let path = find_artifact(destination).await?;
        debug!(path = %path.display(), "Downloader produced artifact");
        ArtifactDescriptor::from_path(path).await
    }
}

/// First finished file in `dir`, skipping partial downloads.
pub async fn find_artifact(dir: &Path) -> Result<PathBuf, ExecutionError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.') {
            continue;
        }
        candidates.push(entry.path());
    }

    candidates.sort();
    candidates.into_iter().next().ok_or(ExecutionError::NoArtifact)
}

/// Height filter for a quality label such as "720p".
fn quality_filter(quality: &str) -> Option<u32> {
    quality.trim().trim_end_matches(['p', 'P']).parse().ok()
}

fn format_selector(request: &SourceRequest) -> String {
    let audio = request.audio_format.as_deref().unwrap_or("bestaudio");
    if !request.is_video() {
        return format!("{audio}/best");
    }

    let video = match &request.video_format {
        Some(format) => format.clone(),
        None => {
            let quality = request.quality.as_deref().unwrap_or(DEFAULT_QUALITY);
            match quality_filter(quality) {
                Some(height) => format!("bestvideo[height<={height}]"),
                None => "bestvideo".to_string(),
            }
        }
    };
    format!("{video}+{audio}/best")
}

/// Command line for one request: configured extra args first, then the
/// request options, then the URL. `now` is the unix time used to place
/// live recording windows.
pub fn build_args(
    request: &SourceRequest,
    destination: &Path,
    extra_args: &[String],
    now: i64,
) -> Vec<String> {
    let mut args: Vec<String> = extra_args.to_vec();

    match request.kind {
        TaskKind::Info => {
            args.extend(["--dump-single-json", "--skip-download"].map(String::from));
        }
        TaskKind::Download | TaskKind::Live => {
            let stem = match (request.kind, request.is_video()) {
                (TaskKind::Live, true) => "live_video",
                (TaskKind::Live, false) => "live_audio",
                (_, true) => "video",
                (_, false) => "audio",
            };
            args.push("-f".into());
            args.push(format_selector(request));
            args.push("-o".into());
            args.push(
                destination
                    .join(format!("{stem}.%(ext)s"))
                    .to_string_lossy()
                    .into_owned(),
            );
            if request.is_video() {
                args.extend(["--merge-output-format", "mp4"].map(String::from));
            }
            if request.kind == TaskKind::Live {
                let secs = |v: Option<u64>| i64::try_from(v.unwrap_or(0)).unwrap_or(i64::MAX);
                let start_time = now.saturating_sub(secs(request.start));
                let end_time = start_time.saturating_add(secs(request.duration));
                args.push("--download-sections".into());
                args.push(format!("*{start_time}-{end_time}"));
            }
        }
    }

    args.push("--".into());
    args.push(request.url.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::MediaType;
    use tempfile::TempDir;

    fn dest() -> PathBuf {
        PathBuf::from("/tmp/downloads/abc")
    }

    #[test]
    fn test_video_download_args() {
        let request = SourceRequest::builder()
            .url("https://example.com/v")
            .media_type(MediaType::Video)
            .quality("720p")
            .build();

        let args = build_args(&request, &dest(), &[], 0);
        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "bestvideo[height<=720]+bestaudio/best");
        assert_eq!(args[3], "/tmp/downloads/abc/video.%(ext)s");
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--", "https://example.com/v"]);
    }

    #[test]
    fn test_audio_download_uses_explicit_format() {
        let request = SourceRequest::builder()
            .url("https://example.com/a")
            .media_type(MediaType::Audio)
            .audio_format("140")
            .build();

        let args = build_args(&request, &dest(), &["--no-playlist".into()], 0);
        assert_eq!(args[0], "--no-playlist");
        assert_eq!(args[1..3], ["-f", "140/best"]);
        assert_eq!(args[4], "/tmp/downloads/abc/audio.%(ext)s");
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_live_window_is_relative_to_now() {
        let request = SourceRequest::builder()
            .url("https://example.com/live")
            .kind(TaskKind::Live)
            .media_type(MediaType::Video)
            .start(60)
            .duration(30)
            .build();

        let args = build_args(&request, &dest(), &[], 1_000);
        let pos = args.iter().position(|a| a == "--download-sections").unwrap();
        assert_eq!(args[pos + 1], "*940-970");
        assert_eq!(args[3], "/tmp/downloads/abc/live_video.%(ext)s");
    }

    #[test]
    fn test_live_window_saturates_on_huge_values() {
        let request = SourceRequest::builder()
            .url("https://example.com/live")
            .kind(TaskKind::Live)
            .media_type(MediaType::Audio)
            .start(1 << 63)
            .duration(u64::MAX)
            .build();

        let args = build_args(&request, &dest(), &[], 1_000);
        let pos = args.iter().position(|a| a == "--download-sections").unwrap();
        assert_eq!(args[pos + 1], format!("*{}-1000", 1_000 - i64::MAX));
    }

    #[test]
    fn test_info_args() {
        let request = SourceRequest::builder()
            .url("https://example.com/i")
            .kind(TaskKind::Info)
            .build();

        let args = build_args(&request, &dest(), &[], 0);
        assert_eq!(
            args,
            vec!["--dump-single-json", "--skip-download", "--", "https://example.com/i"]
        );
    }

    #[tokio::test]
    async fn test_find_artifact_skips_partials() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("video.mp4.part"), b"..").unwrap();
        assert!(matches!(
            find_artifact(dir.path()).await,
            Err(ExecutionError::NoArtifact)
        ));

        std::fs::write(dir.path().join("video.mp4"), b"data").unwrap();
        let found = find_artifact(dir.path()).await.unwrap();
        assert_eq!(found, dir.path().join("video.mp4"));

        let descriptor = ArtifactDescriptor::from_path(found).await.unwrap();
        assert_eq!(descriptor.file_name, "video.mp4");
        assert_eq!(descriptor.size_bytes, 4);
    }

    // `sh -c <script>` binds the generated options to $0.. and ignores them.
    fn shell(script: &str) -> CommandExecutor {
        CommandExecutor::new("sh", vec!["-c".into(), script.into()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_keeps_stderr_verbatim() {
        let dir = TempDir::new().unwrap();
        let request = SourceRequest::builder()
            .url("https://example.com/x")
            .kind(TaskKind::Info)
            .build();

        let result = shell("echo 'ERROR: Unsupported URL' >&2; exit 3")
            .execute(&request, dir.path())
            .await;
        match result {
            Err(ExecutionError::Failed { code, message }) => {
                assert_eq!(code, Some(3));
                assert_eq!(message, "ERROR: Unsupported URL");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_info_stdout_becomes_artifact() {
        let dir = TempDir::new().unwrap();
        let request = SourceRequest::builder()
            .url("https://example.com/x")
            .kind(TaskKind::Info)
            .build();

        let artifact = shell("printf '{\"title\":\"x\"}'")
            .execute(&request, dir.path())
            .await
            .unwrap();
        assert_eq!(artifact.file_name, INFO_FILE);
        assert_eq!(
            std::fs::read_to_string(artifact.path).unwrap(),
            r#"{"title":"x"}"#
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let request = SourceRequest::builder().url("https://example.com/x").build();

        let result = CommandExecutor::new("grabbox-no-such-binary", vec![])
            .execute(&request, dir.path())
            .await;
        assert!(matches!(result, Err(ExecutionError::Spawn { .. })));
    }
}
