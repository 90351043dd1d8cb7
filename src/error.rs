use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single rejected row during CSV ingestion
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RowError {
    /// 1-based data row number (header excluded)
    pub row: usize,
    pub column: Option<String>,
    pub message: String,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Required columns are missing and could not be reconciled through aliases
    #[error("Schema error: missing columns {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// No usable rows remain after filtering
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// Model fit failed
    #[error("Training error: {0}")]
    Training(String),

    /// Prediction requested before any model was persisted
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Prediction or ingestion input lacks required fields
    #[error("Missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },

    /// Requested object does not exist in the storage backend
    #[error("Storage object not found: {0}")]
    StorageNotFound(String),

    /// Storage backend failure (unreachable, permission, corrupt payload)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Null values found in required columns
    #[error("Null values found in required columns: {}", .columns.keys().cloned().collect::<Vec<_>>().join(", "))]
    NullValues {
        columns: BTreeMap<String, usize>,
        rows: Vec<usize>,
    },

    /// Too many row-level errors during ingestion; nothing was committed
    #[error("Ingestion aborted: {} row errors exceed the threshold of {threshold}", .errors.len())]
    IngestionAborted {
        errors: Vec<RowError>,
        threshold: usize,
    },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Schema { .. } => StatusCode::BAD_REQUEST,
            AppError::EmptyDataset(_) => StatusCode::BAD_REQUEST,
            AppError::Training(_) => StatusCode::BAD_REQUEST,
            AppError::ModelNotLoaded(_) => StatusCode::NOT_FOUND,
            AppError::MissingFields { .. } => StatusCode::BAD_REQUEST,
            AppError::StorageNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NullValues { .. } => StatusCode::BAD_REQUEST,
            AppError::IngestionAborted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Schema { .. } => "SCHEMA_ERROR",
            AppError::EmptyDataset(_) => "EMPTY_DATASET",
            AppError::Training(_) => "TRAINING_ERROR",
            AppError::ModelNotLoaded(_) => "MODEL_NOT_LOADED",
            AppError::MissingFields { .. } => "MISSING_FIELDS",
            AppError::StorageNotFound(_) => "STORAGE_NOT_FOUND",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NullValues { .. } => "NULL_VALUES",
            AppError::IngestionAborted { .. } => "INGESTION_ABORTED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structured payload attached to the error body, if any
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Schema { missing } => Some(json!({ "missing_columns": missing })),
            AppError::MissingFields { fields } => Some(json!({ "missing_fields": fields })),
            AppError::NullValues { columns, rows } => Some(json!({
                "null_fields": columns,
                "null_rows": rows,
            })),
            AppError::IngestionAborted { errors, threshold } => Some(json!({
                "threshold": threshold,
                "records_errors": errors.len(),
                "row_errors": errors,
            })),
            _ => None,
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request rejected"
            );
        }

        let mut body = json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16(),
            }
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Validation(format!("Malformed CSV: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::Validation(format!("Malformed multipart body: {}", err))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
