//! Where task output lives: a working directory per task under the
//! download dir, optionally offloaded to object storage.

use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::storage::StorageClient;
use crate::task::{ArtifactRef, TaskId};
use crate::worker::ArtifactDescriptor;

/// URL path prefix under which local artifacts are served.
pub const FILES_ROUTE: &str = "/files";

#[derive(Debug, Clone)]
pub struct Artifacts {
    download_dir: PathBuf,
    storage: Option<StorageClient>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrphanStats {
    pub directories: usize,
    pub prefixes: usize,
}

impl Artifacts {
    pub fn new(download_dir: impl Into<PathBuf>, storage: Option<StorageClient>) -> Self {
        Self {
            download_dir: download_dir.into(),
            storage,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn task_dir(&self, id: &TaskId) -> PathBuf {
        self.download_dir.join(id.as_str())
    }

    /// Create an empty working directory for a task about to run.
    pub async fn prepare(&self, id: &TaskId) -> io::Result<PathBuf> {
        let dir = self.task_dir(id);
        remove_dir_if_present(&dir).await?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn local_ref(id: &TaskId, file_name: &str) -> ArtifactRef {
        ArtifactRef::Local {
            path: format!("{FILES_ROUTE}/{id}/{file_name}"),
        }
    }

    /// Turn a finished file into the reference stored on the task.
    ///
    /// With offload enabled the file is uploaded and the working directory
    /// removed. A failed upload degrades to the local reference.
    pub async fn publish(&self, id: &TaskId, artifact: &ArtifactDescriptor) -> ArtifactRef {
        let Some(storage) = &self.storage else {
            return Self::local_ref(id, &artifact.file_name);
        };

        let key = format!("{}/{}", id, artifact.file_name);
        match storage.upload_file(&artifact.path, &key).await {
            Ok(url) => {
                info!(task_id = %id, url, size = artifact.size_bytes, "Artifact offloaded");
                if let Err(e) = remove_dir_if_present(&self.task_dir(id)).await {
                    warn!(task_id = %id, error = %e, "Failed to remove working directory");
                }
                ArtifactRef::Remote { url }
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Offload failed, serving artifact locally");
                Self::local_ref(id, &artifact.file_name)
            }
        }
    }

    /// Drop the working directory of a task that produced nothing useful.
    pub async fn discard(&self, id: &TaskId) {
        if let Err(e) = remove_dir_if_present(&self.task_dir(id)).await {
            warn!(task_id = %id, error = %e, "Failed to remove working directory");
        }
    }

    /// Remove everything held for a task, locally and remotely.
    pub async fn release(&self, id: &TaskId) {
        self.discard(id).await;
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.delete_prefix(id.as_str()).await {
                warn!(task_id = %id, error = %e, "Failed to delete offloaded artifacts");
            }
        }
    }

    /// Remove directories and storage prefixes that belong to no task.
    ///
    /// `known_ids` is consulted after the listings are taken, so a task
    /// created while this runs keeps its directory.
    pub async fn remove_orphans<F>(&self, known_ids: F) -> io::Result<OrphanStats>
    where
        F: FnOnce() -> io::Result<HashSet<TaskId>>,
    {
        let mut stats = OrphanStats::default();

        let mut dirs = Vec::new();
        match tokio::fs::read_dir(&self.download_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        dirs.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let prefixes = match &self.storage {
            Some(storage) => match storage.list_prefixes().await {
                Ok(prefixes) => prefixes,
                Err(e) => {
                    warn!(error = %e, "Failed to list storage prefixes");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let known = known_ids()?;

        for name in dirs {
            if known.contains(&TaskId::from(name.as_str())) {
                continue;
            }
            debug!(dir = %name, "Removing orphaned directory");
            remove_dir_if_present(&self.download_dir.join(&name)).await?;
            stats.directories += 1;
        }

        if let Some(storage) = &self.storage {
            for prefix in prefixes {
                if known.contains(&TaskId::from(prefix.as_str())) {
                    continue;
                }
                match storage.delete_prefix(&prefix).await {
                    Ok(_) => stats.prefixes += 1,
                    Err(e) => warn!(prefix, error = %e, "Failed to delete orphaned prefix"),
                }
            }
        }

        if stats != OrphanStats::default() {
            info!(
                directories = stats.directories,
                prefixes = stats.prefixes,
                "Removed orphaned artifacts"
            );
        }
        Ok(stats)
    }

    /// Map a `/files/<rel>` path onto the download dir. Rejects anything
    /// that could escape it.
    pub fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let rel = Path::new(rel);
        if rel.as_os_str().is_empty() {
            return None;
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return None,
            }
        }
        Some(self.download_dir.join(rel))
    }
}

async fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn produce(artifacts: &Artifacts, id: &TaskId) -> ArtifactDescriptor {
        let dir = artifacts.prepare(id).await.unwrap();
        let path = dir.join("video.mp4");
        tokio::fs::write(&path, b"media").await.unwrap();
        ArtifactDescriptor::from_path(path).await.unwrap()
    }

    #[tokio::test]
    async fn test_publish_locally() {
        let temp = TempDir::new().unwrap();
        let artifacts = Artifacts::new(temp.path(), None);
        let id = TaskId::new("abc");

        let descriptor = produce(&artifacts, &id).await;
        let reference = artifacts.publish(&id, &descriptor).await;

        assert_eq!(
            reference,
            ArtifactRef::Local {
                path: "/files/abc/video.mp4".into()
            }
        );
        assert!(artifacts.task_dir(&id).join("video.mp4").exists());

        artifacts.release(&id).await;
        assert!(!artifacts.task_dir(&id).exists());
    }

    #[tokio::test]
    async fn test_publish_offloads_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let artifacts = Artifacts::new(temp.path(), Some(StorageClient::in_memory()));
        let id = TaskId::new("abc");

        let descriptor = produce(&artifacts, &id).await;
        let reference = artifacts.publish(&id, &descriptor).await;

        assert_eq!(
            reference,
            ArtifactRef::Remote {
                url: "memory://grabbox/abc/video.mp4".into()
            }
        );
        assert!(!artifacts.task_dir(&id).exists());
    }

    #[tokio::test]
    async fn test_failed_offload_keeps_local_artifact() {
        let temp = TempDir::new().unwrap();
        let bucket = temp.path().join("bucket");
        let storage = StorageClient::local(&bucket).unwrap();
        // Uploads now fail: the store root is a plain file.
        std::fs::remove_dir(&bucket).unwrap();
        std::fs::write(&bucket, b"not a directory").unwrap();

        let artifacts = Artifacts::new(temp.path().join("downloads"), Some(storage));
        let id = TaskId::new("abc");

        let descriptor = produce(&artifacts, &id).await;
        let reference = artifacts.publish(&id, &descriptor).await;

        assert_eq!(
            reference,
            ArtifactRef::Local {
                path: "/files/abc/video.mp4".into()
            }
        );
        assert!(artifacts.task_dir(&id).join("video.mp4").exists());
    }

    #[tokio::test]
    async fn test_remove_orphans_keeps_known_tasks() {
        let temp = TempDir::new().unwrap();
        let artifacts = Artifacts::new(temp.path(), None);
        let live = TaskId::new("live");
        let orphan = TaskId::new("orphan");
        artifacts.prepare(&live).await.unwrap();
        artifacts.prepare(&orphan).await.unwrap();

        let stats = artifacts
            .remove_orphans(|| Ok(HashSet::from([live.clone()])))
            .await
            .unwrap();

        assert_eq!(stats.directories, 1);
        assert!(artifacts.task_dir(&live).exists());
        assert!(!artifacts.task_dir(&orphan).exists());
    }

    #[tokio::test]
    async fn test_remove_orphans_without_download_dir() {
        let temp = TempDir::new().unwrap();
        let artifacts = Artifacts::new(temp.path().join("missing"), None);
        let stats = artifacts.remove_orphans(|| Ok(HashSet::new())).await.unwrap();
        assert_eq!(stats, OrphanStats::default());
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let artifacts = Artifacts::new("/srv/downloads", None);
        assert_eq!(
            artifacts.resolve("abc/video.mp4"),
            Some(PathBuf::from("/srv/downloads/abc/video.mp4"))
        );
        assert!(artifacts.resolve("../etc/passwd").is_none());
        assert!(artifacts.resolve("/etc/passwd").is_none());
        assert!(artifacts.resolve("abc/../../x").is_none());
        assert!(artifacts.resolve("").is_none());
    }
}
