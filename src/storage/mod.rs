//! Persistence of the fitted model and its metrics document.

pub mod factory;
pub mod local;
pub mod object;

pub use factory::create_storage;
pub use local::LocalStorage;
pub use object::ObjectStorage;

use crate::error::{AppError, Result};
use crate::ml::{MetricsDocument, ModelArtifact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Size and location of a persisted object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub size_bytes: u64,
    pub size_mb: f64,
    pub last_modified: Option<DateTime<Utc>>,
    pub location: String,
}

impl ObjectInfo {
    pub fn new(size_bytes: u64, last_modified: Option<DateTime<Utc>>, location: String) -> Self {
        let size_mb = (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        Self {
            size_bytes,
            size_mb,
            last_modified,
            location,
        }
    }
}

/// Reject artifact names that are not a single plain file name.
///
/// Names arrive from request bodies and end up as paths and URL keys.
pub fn validate_artifact_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.trim().is_empty() || !plain || name.contains(['/', '\\']) {
        return Err(AppError::Validation(format!(
            "invalid artifact file name '{}': expected a plain file name",
            name
        )));
    }
    Ok(())
}

/// Whole-object storage for artifacts, addressed by file name
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Backend label for logs and model info
    fn backend_name(&self) -> &'static str;

    /// Where `name` lives (path or URL)
    fn location(&self, name: &str) -> String;

    /// Overwrite `name` with `bytes`; returns the location
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Read `name`; [`AppError::StorageNotFound`] when absent
    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// [`AppError::StorageNotFound`] when absent
    async fn info(&self, name: &str) -> Result<ObjectInfo>;

    async fn save_model(&self, artifact: &ModelArtifact, name: &str) -> Result<String> {
        let bytes = bincode::serialize(artifact)?;
        let location = self.put(name, bytes).await?;
        tracing::info!(backend = self.backend_name(), location = %location, "Model saved");
        Ok(location)
    }

    async fn load_model(&self, name: &str) -> Result<ModelArtifact> {
        let bytes = self.get(name).await?;
        bincode::deserialize(&bytes).map_err(|e| {
            AppError::Storage(format!("Corrupt model artifact '{}': {}", name, e))
        })
    }

    async fn save_metrics(&self, metrics: &MetricsDocument, name: &str) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(metrics)?;
        let location = self.put(name, bytes).await?;
        tracing::info!(backend = self.backend_name(), location = %location, "Metrics saved");
        Ok(location)
    }

    async fn load_metrics(&self, name: &str) -> Result<MetricsDocument> {
        let bytes = self.get(name).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Storage(format!("Corrupt metrics document '{}': {}", name, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_accepted() {
        for name in ["modelo_accidentes.bin", "metricas_modelo.json", "v2.model"] {
            assert!(validate_artifact_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_path_like_names_are_rejected() {
        for name in [
            "",
            " ",
            ".",
            "..",
            "./../x.bin",
            "../x.bin",
            "/tmp/x.bin",
            "nested/x.bin",
            "x.bin/",
            "..\\x.bin",
        ] {
            let err = validate_artifact_name(name).unwrap_err();
            assert_eq!(err.error_code(), "VALIDATION_ERROR", "{name:?}");
        }
    }
}
