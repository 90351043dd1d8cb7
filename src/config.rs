use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Incident record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Model and metrics persistence configuration
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Training / prediction / ingestion pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: ACCIDENT_RISK_)
            .add_source(
                config::Environment::with_prefix("ACCIDENT_RISK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted upload size for CSV endpoints
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Record store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sled,
            path: Some(PathBuf::from("./data/records")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Storage backend for model and metrics files
    #[serde(default)]
    pub backend: ArtifactBackend,

    /// Directory used by the local backend
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Base URL of the object storage service (object backend)
    pub endpoint: Option<String>,

    /// Bucket name (object backend)
    pub bucket: Option<String>,

    /// Key prefix prepended to every object name (object backend)
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Name of the environment variable holding a bearer token
    pub token_env: Option<String>,

    /// Timeout for a single storage request (seconds)
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,

    /// Default model file name
    #[serde(default = "default_model_filename")]
    pub model_filename: String,

    /// Default metrics file name
    #[serde(default = "default_metrics_filename")]
    pub metrics_filename: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            backend: ArtifactBackend::Local,
            local_dir: default_local_dir(),
            endpoint: None,
            bucket: None,
            prefix: default_prefix(),
            token_env: None,
            timeout_secs: default_storage_timeout(),
            model_filename: default_model_filename(),
            metrics_filename: default_metrics_filename(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactBackend {
    #[default]
    Local,
    Object,
}

/// How to fill an incident date that is blank or unparseable
#[derive(Debug, Clone, PartialEq)]
pub enum DateFallback {
    /// Use the ingestion day
    Today,
    /// Use a fixed calendar date
    Fixed(NaiveDate),
}

impl DateFallback {
    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        match self {
            DateFallback::Today => today,
            DateFallback::Fixed(date) => *date,
        }
    }
}

impl Serialize for DateFallback {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DateFallback::Today => serializer.serialize_str("today"),
            DateFallback::Fixed(date) => serializer.serialize_str(&date.format("%Y-%m-%d").to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for DateFallback {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().eq_ignore_ascii_case("today") {
            return Ok(DateFallback::Today);
        }
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(DateFallback::Fixed)
            .map_err(|e| serde::de::Error::custom(format!("invalid date_fallback '{}': {}", raw, e)))
    }
}

/// The single configuration that parameterizes training, prediction and ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ordered model input columns
    #[serde(default = "default_feature_columns")]
    pub feature_columns: Vec<String>,

    /// Binary label column
    #[serde(default = "default_target_column")]
    pub target_column: String,

    /// Columns never used as features
    #[serde(default = "default_excluded_columns")]
    pub excluded_columns: Vec<String>,

    /// Incident date column required on ingestion
    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// Additional accepted-name -> canonical-name entries
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Fraction of rows held out for evaluation
    #[serde(default = "default_test_size")]
    pub test_size: f64,

    /// Seed for splitting, oversampling and bagging
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Minority/majority ratio below which the high-capacity profile is used
    #[serde(default = "default_imbalance_threshold")]
    pub imbalance_threshold: f64,

    /// Oversample the minority class of the training split
    #[serde(default = "default_true")]
    pub use_smote: bool,

    /// Neighbours considered when synthesizing minority samples
    #[serde(default = "default_smote_k")]
    pub smote_k_neighbors: usize,

    /// Decision threshold when a request does not provide one
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    /// Fallback for blank or unparseable incident dates
    #[serde(default = "default_date_fallback")]
    pub date_fallback: DateFallback,

    /// Row errors tolerated before an ingestion batch is aborted
    #[serde(default = "default_max_row_errors")]
    pub max_row_errors: usize,

    /// Retrain after an ingestion that created at least one record
    #[serde(default = "default_true")]
    pub auto_retrain: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feature_columns: default_feature_columns(),
            target_column: default_target_column(),
            excluded_columns: default_excluded_columns(),
            date_column: default_date_column(),
            aliases: BTreeMap::new(),
            test_size: default_test_size(),
            random_seed: default_random_seed(),
            imbalance_threshold: default_imbalance_threshold(),
            use_smote: true,
            smote_k_neighbors: default_smote_k(),
            default_threshold: default_threshold(),
            date_fallback: default_date_fallback(),
            max_row_errors: default_max_row_errors(),
            auto_retrain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("./data/ml_model")
}

fn default_prefix() -> String {
    "ml-models/".to_string()
}

fn default_storage_timeout() -> u64 {
    30
}

fn default_model_filename() -> String {
    "modelo_accidentes.bin".to_string()
}

fn default_metrics_filename() -> String {
    "metricas_modelo.json".to_string()
}

pub fn default_feature_columns() -> Vec<String> {
    crate::models::FEATURE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_target_column() -> String {
    crate::models::TARGET_COLUMN.to_string()
}

fn default_excluded_columns() -> Vec<String> {
    vec![
        crate::models::INCIDENT_DATE_COLUMN.to_string(),
        crate::models::INGESTION_DATE_COLUMN.to_string(),
        "id".to_string(),
    ]
}

fn default_date_column() -> String {
    crate::models::INCIDENT_DATE_COLUMN.to_string()
}

fn default_test_size() -> f64 {
    0.2
}

fn default_random_seed() -> u64 {
    42
}

fn default_imbalance_threshold() -> f64 {
    0.25
}

fn default_smote_k() -> usize {
    5
}

fn default_threshold() -> f64 {
    0.5
}

fn default_date_fallback() -> DateFallback {
    DateFallback::Today
}

fn default_max_row_errors() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
