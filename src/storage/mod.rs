//! Object storage for offloaded artifacts
//! Uses the Apache Arrow object_store crate

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{ObjectStore, local::LocalFileSystem, memory::InMemory, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Storage misconfigured: {0}")]
    Misconfigured(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("store", &self.store.to_string())
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://grabbox")
    }

    /// Local directory acting as the object store
    pub fn local(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        let root = root.canonicalize()?;
        Ok(Self::new(
            Arc::new(store),
            format!("file://{}", root.display()),
        ))
    }

    /// `None` when offload is disabled
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>> {
        if !config.offload {
            return Ok(None);
        }

        let mut client = match config.provider {
            StorageProvider::Memory => Self::in_memory(),
            StorageProvider::Local => {
                let root = config.root.as_deref().ok_or_else(|| {
                    StorageError::Misconfigured("local provider requires storage.root".into())
                })?;
                Self::local(root)?
            }
        };

        if let Some(base) = &config.public_base_url {
            client.public_base_url = base.trim_end_matches('/').to_string();
        }
        Ok(Some(client))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// Upload a local file under `key` and return its public URL
    pub async fn upload_file(&self, local: &Path, key: &str) -> Result<String> {
        let data = Bytes::from(tokio::fs::read(local).await?);
        let size = data.len();

        let put_result = self
            .store
            .put(&StoragePath::from(key), data.into())
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        tracing::info!(key, size, etag = ?put_result.e_tag, "Uploaded to storage");
        Ok(self.public_url(key))
    }

    /// Delete every object under `prefix/`. Returns how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = StoragePath::from(prefix);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        for meta in &objects {
            match self.store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !objects.is_empty() {
            tracing::debug!(prefix = %prefix, count = objects.len(), "Deleted objects");
        }
        Ok(objects.len())
    }

    /// Top-level prefixes (one per task that offloaded something)
    pub async fn list_prefixes(&self) -> Result<Vec<String>> {
        let listing = self.store.list_with_delimiter(None).await?;
        Ok(listing
            .common_prefixes
            .into_iter()
            .map(|p| p.to_string())
            .collect())
    }
}
