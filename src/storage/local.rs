use crate::error::{AppError, Result};
use crate::storage::{validate_artifact_name, ArtifactStorage, ObjectInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Artifacts as files under one directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name`, which must stay directly under the root
    fn path(&self, name: &str) -> Result<PathBuf> {
        validate_artifact_name(name)?;
        Ok(self.root.join(name))
    }

    fn not_found(&self, name: &str) -> AppError {
        AppError::StorageNotFound(format!("{} does not exist", self.location(name)))
    }
}

#[async_trait]
impl ArtifactStorage for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn location(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let final_path = self.path(name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Written under a temporary name and renamed, so readers never see a partial file
        let tmp_path = self.root.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp_path, &final_path).await?;

        tracing::debug!(path = %final_path.display(), bytes = bytes.len(), "Wrote artifact");
        Ok(final_path.display().to_string())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path(name)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.not_found(name)),
            Err(e) => Err(AppError::Storage(format!(
                "Failed to read {}: {}",
                self.location(name),
                e
            ))),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(name)?).await?)
    }

    async fn info(&self, name: &str) -> Result<ObjectInfo> {
        let metadata = match tokio::fs::metadata(self.path(name)?).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found(name)),
            Err(e) => return Err(e.into()),
        };

        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(ObjectInfo::new(metadata.len(), last_modified, self.location(name)))
    }
}
