use crate::error::{AppError, Result};
use crate::storage::{validate_artifact_name, ArtifactStorage, ObjectInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

/// Artifacts in an HTTP object store, path-style (`{endpoint}/{bucket}/{prefix}{name}`).
///
/// Every call is a single request with a bounded timeout and no retries.
#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    endpoint: String,
    bucket: String,
    prefix: String,
    token: Option<String>,
}

impl ObjectStorage {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            prefix: prefix.into(),
            token,
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, self.key(name))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn unavailable(&self, name: &str, err: impl std::fmt::Display) -> AppError {
        AppError::Storage(format!("{} unavailable: {}", self.url(name), err))
    }
}

#[async_trait]
impl ArtifactStorage for ObjectStorage {
    fn backend_name(&self) -> &'static str {
        "object"
    }

    fn location(&self, name: &str) -> String {
        self.url(name)
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        validate_artifact_name(name)?;
        let response = self
            .authorize(self.client.put(self.url(name)))
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.unavailable(name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Storage(format!(
                "PUT {} returned {}",
                self.url(name),
                status
            )));
        }

        Ok(self.url(name))
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        validate_artifact_name(name)?;
        let response = self
            .authorize(self.client.get(self.url(name)))
            .send()
            .await
            .map_err(|e| self.unavailable(name, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(AppError::StorageNotFound(format!(
                "{} does not exist",
                self.url(name)
            ))),
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| self.unavailable(name, e))?
                .to_vec()),
            status => Err(AppError::Storage(format!(
                "GET {} returned {}",
                self.url(name),
                status
            ))),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self.info(name).await {
            Ok(_) => Ok(true),
            Err(AppError::StorageNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn info(&self, name: &str) -> Result<ObjectInfo> {
        validate_artifact_name(name)?;
        let response = self
            .authorize(self.client.head(self.url(name)))
            .send()
            .await
            .map_err(|e| self.unavailable(name, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::StorageNotFound(format!(
                "{} does not exist",
                self.url(name)
            )));
        }
        if !status.is_success() {
            return Err(AppError::Storage(format!(
                "HEAD {} returned {}",
                self.url(name),
                status
            )));
        }

        let headers = response.headers();
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let last_modified = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(ObjectInfo::new(size, last_modified, self.url(name)))
    }
}
