//! Object storage for thumbnails

use async_trait::async_trait;
use dashmap::DashMap;
use library_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Uploaded asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Storage id, used for deletion
    pub public_id: String,
    /// Public URL
    pub secure_url: String,
}

/// Image storage collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local file into `folder`
    async fn upload(&self, local_path: &Path, folder: &str) -> Result<StoredObject>;

    /// Delete an asset; `Ok(false)` when the store refused or did not know it
    async fn delete(&self, public_id: &str) -> Result<bool>;
}

/// In-process object storage
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStorage {
    objects: Arc<DashMap<String, StoredObject>>,
}

impl MemoryObjectStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an asset is currently stored
    pub fn contains(&self, public_id: &str) -> bool {
        self.objects.contains_key(public_id)
    }

    /// Number of stored assets
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, local_path: &Path, folder: &str) -> Result<StoredObject> {
        let meta = tokio::fs::metadata(local_path).await?;
        if !meta.is_file() {
            return Err(Error::Storage(format!(
                "{} is not a file",
                local_path.display()
            )));
        }

        let public_id = format!("{}/{}", folder, Uuid::new_v4().simple());
        let object = StoredObject {
            secure_url: format!("memory://{}", public_id),
            public_id: public_id.clone(),
        };
        self.objects.insert(public_id, object.clone());

        tracing::debug!(public_id = %object.public_id, "Stored object");
        Ok(object)
    }

    async fn delete(&self, public_id: &str) -> Result<bool> {
        Ok(self.objects.remove(public_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_upload_then_delete() {
        let storage = MemoryObjectStorage::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"png").unwrap();

        let object = storage.upload(file.path(), "thumbs").await.unwrap();
        assert!(object.public_id.starts_with("thumbs/"));
        assert!(storage.contains(&object.public_id));

        assert!(storage.delete(&object.public_id).await.unwrap());
        assert!(!storage.delete(&object.public_id).await.unwrap());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails() {
        let storage = MemoryObjectStorage::new();
        let result = storage
            .upload(Path::new("/definitely/not/here.png"), "thumbs")
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
