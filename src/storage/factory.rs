use crate::config::{ArtifactBackend, ArtifactConfig};
use crate::error::{AppError, Result};
use crate::storage::{ArtifactStorage, LocalStorage, ObjectStorage};
use std::sync::Arc;

/// Create the artifact storage backend named by configuration
pub fn create_storage(config: &ArtifactConfig) -> Result<Arc<dyn ArtifactStorage>> {
    match config.backend {
        ArtifactBackend::Local => {
            tracing::info!(dir = ?config.local_dir, "Initializing local artifact storage");
            Ok(Arc::new(LocalStorage::new(&config.local_dir)))
        }

        ArtifactBackend::Object => {
            let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                AppError::Configuration("Object backend requires 'endpoint' configuration".to_string())
            })?;
            let bucket = config.bucket.as_ref().ok_or_else(|| {
                AppError::Configuration("Object backend requires 'bucket' configuration".to_string())
            })?;

            let token = match &config.token_env {
                Some(var) => match std::env::var(var) {
                    Ok(token) => Some(token),
                    Err(_) => {
                        tracing::warn!(env = %var, "Storage token variable not set, sending unauthenticated requests");
                        None
                    }
                },
                None => None,
            };

            tracing::info!(endpoint = %endpoint, bucket = %bucket, prefix = %config.prefix, "Initializing object artifact storage");

            let storage = ObjectStorage::new(
                endpoint.clone(),
                bucket.clone(),
                config.prefix.clone(),
                token,
                config.timeout_secs,
            )?;
            Ok(Arc::new(storage))
        }
    }
}
