use crate::config::{ArtifactConfig, PipelineConfig};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::ml::dataset::DatasetBuilder;
use crate::ml::models::{HyperparameterProfile, Hyperparameters, MetricsDocument, ModelArtifact};
use crate::ml::trainer::{train_model, TrainingOptions};
use crate::models::{PredictionResult, PredictionSummary};
use crate::schema::FeatureSchema;
use crate::state::{RecordFilter, RecordStore};
use crate::storage::{validate_artifact_name, ArtifactStorage};
use crate::table::{parse_integer, RawTable};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Body of a training request; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainRequest {
    pub target_col: Option<String>,
    pub model_filename: Option<String>,
    pub metrics_filename: Option<String>,
    /// Explicit hyperparameters bypass the profile policy
    #[serde(default)]
    pub hyperparameters: Option<Hyperparameters>,
}

/// Bookkeeping about the data a model was trained on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub total_records: usize,
    pub used_records: usize,
    pub dropped_rows: usize,
    pub repaired_values: usize,
    pub categorical_columns: Vec<String>,
    pub target_column: String,
    pub features_used: Vec<String>,
    pub hyperparameter_profile: HyperparameterProfile,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub model_path: String,
    pub metrics_path: String,
    pub metrics: MetricsDocument,
    pub training_info: TrainingInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionBatch {
    pub predictions: Vec<PredictionResult>,
    pub summary: PredictionSummary,
    pub threshold_used: f64,
}

/// Persisted model facts for the model-info endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_exists: bool,
    pub model_size_bytes: u64,
    pub model_size_mb: f64,
    pub last_modified: Option<DateTime<Utc>>,
    pub model_location: String,
    pub metrics_location: String,
    pub training_fields: Vec<String>,
    pub target_field: String,
    pub excluded_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfoReport {
    pub model_info: ModelInfo,
    pub metrics: Option<MetricsDocument>,
}

/// Artifact currently served plus the names it was persisted under
struct ActiveModel {
    artifact: Option<Arc<ModelArtifact>>,
    model_name: String,
    metrics_name: String,
}

/// Owns the served model; trains, persists and predicts
pub struct RiskModelService {
    pipeline: PipelineConfig,
    schema: FeatureSchema,
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn ArtifactStorage>,
    active: Arc<RwLock<ActiveModel>>,
    /// Serializes training runs
    training_lock: Arc<Mutex<()>>,
}

impl RiskModelService {
    pub fn new(
        pipeline: PipelineConfig,
        artifacts: &ArtifactConfig,
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn ArtifactStorage>,
    ) -> Self {
        Self {
            schema: FeatureSchema::from_config(&pipeline),
            pipeline,
            store,
            storage,
            active: Arc::new(RwLock::new(ActiveModel {
                artifact: None,
                model_name: artifacts.model_filename.clone(),
                metrics_name: artifacts.metrics_filename.clone(),
            })),
            training_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn storage(&self) -> &Arc<dyn ArtifactStorage> {
        &self.storage
    }

    /// Load the persisted artifact if there is one; absence is not an error
    pub async fn warm_up(&self) -> Result<bool> {
        match self.current_artifact().await {
            Ok(artifact) => {
                info!(
                    features = artifact.feature_columns.len(),
                    trees = artifact.forest.n_trees(),
                    trained_at = %artifact.trained_at,
                    "🚀 Model loaded at startup"
                );
                Ok(true)
            }
            Err(AppError::ModelNotLoaded(_)) => {
                info!("No persisted model found, predictions unavailable until training");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted model at startup");
                Err(e)
            }
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.active.read().await.artifact.is_some()
    }

    /// The served artifact, loading it from storage on first use
    pub async fn current_artifact(&self) -> Result<Arc<ModelArtifact>> {
        let name = {
            let active = self.active.read().await;
            if let Some(artifact) = &active.artifact {
                return Ok(artifact.clone());
            }
            active.model_name.clone()
        };

        let artifact = match self.storage.load_model(&name).await {
            Ok(artifact) => Arc::new(artifact),
            Err(AppError::StorageNotFound(_)) => {
                return Err(AppError::ModelNotLoaded(
                    "no trained model is available; train a model first".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        let mut active = self.active.write().await;
        // a concurrent training run may have swapped in a newer model
        if let Some(existing) = &active.artifact {
            return Ok(existing.clone());
        }
        active.artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Train on a snapshot of the record store
    pub async fn train(&self, request: TrainRequest) -> Result<TrainingReport> {
        let records = self.store.all_records(&RecordFilter::default()).await?;
        if records.is_empty() {
            return Err(AppError::EmptyDataset(
                "the record store is empty; upload data before training".to_string(),
            ));
        }
        self.train_on_table(RawTable::from_records(&records), request)
            .await
    }

    /// Train on an arbitrary table, persist, then swap the served model.
    ///
    /// The run is spawned onto the runtime and completes even if the caller
    /// stops waiting, so persisted files and the served model stay in step.
    pub async fn train_on_table(
        &self,
        table: RawTable,
        request: TrainRequest,
    ) -> Result<TrainingReport> {
        for name in [&request.model_filename, &request.metrics_filename]
            .into_iter()
            .flatten()
        {
            validate_artifact_name(name)?;
        }

        let job = TrainingJob {
            pipeline: self.pipeline.clone(),
            schema: self.schema.clone(),
            storage: self.storage.clone(),
            active: self.active.clone(),
            training_lock: self.training_lock.clone(),
        };
        tokio::spawn(job.run(table, request))
            .await
            .map_err(|e| AppError::Internal(format!("training task failed: {}", e)))?
    }

    /// Predict for JSON records keyed by feature name (aliases accepted)
    pub async fn predict(
        &self,
        rows: &[Map<String, Value>],
        threshold: Option<f64>,
    ) -> Result<PredictionBatch> {
        let threshold = self.resolve_threshold(threshold)?;
        if rows.is_empty() {
            return Err(AppError::Validation("no records to predict".to_string()));
        }

        let artifact = self.current_artifact().await?;
        let features = &artifact.feature_columns;

        let mut missing: BTreeSet<usize> = BTreeSet::new();
        let mut invalid: Option<AppError> = None;
        let mut inputs: Vec<BTreeMap<String, i64>> = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let mut canonical: BTreeMap<String, &Value> = BTreeMap::new();
            for (key, value) in row {
                if let Some(name) = self.schema.canonical_name(key) {
                    canonical.entry(name).or_insert(value);
                }
            }

            let mut input = BTreeMap::new();
            for (pos, feature) in features.iter().enumerate() {
                match canonical.get(feature) {
                    None | Some(Value::Null) => {
                        missing.insert(pos);
                    }
                    Some(value) => match encode_json(&artifact, feature, value) {
                        Some(parsed) => {
                            input.insert(feature.clone(), parsed);
                        }
                        None => {
                            invalid.get_or_insert_with(|| {
                                AppError::Validation(format!(
                                    "record {}: field {} must be {}, got {}",
                                    index,
                                    feature,
                                    artifact.expected_values(feature),
                                    value
                                ))
                            });
                        }
                    },
                }
            }
            inputs.push(input);
        }

        // every absent field is reported before any bad value
        if !missing.is_empty() {
            return Err(AppError::MissingFields {
                fields: missing.into_iter().map(|pos| features[pos].clone()).collect(),
            });
        }
        if let Some(err) = invalid {
            return Err(err);
        }

        let matrix = feature_matrix(features, &inputs)?;
        self.score(&artifact, matrix, inputs, threshold).await
    }

    /// Predict for every row of an uploaded table.
    ///
    /// Empty input, missing columns, nulls and non-integer cells are rejected
    /// before the model runs.
    pub async fn predict_table(
        &self,
        table: &RawTable,
        threshold: Option<f64>,
    ) -> Result<PredictionBatch> {
        let threshold = self.resolve_threshold(threshold)?;
        if table.is_empty() {
            return Err(AppError::Validation("the uploaded file has no rows".to_string()));
        }

        let artifact = self.current_artifact().await?;
        let features = &artifact.feature_columns;
        let mapping = self
            .schema
            .reconcile(&table.columns, features)
            .map_err(|e| match e {
                AppError::Schema { missing } => AppError::MissingFields { fields: missing },
                other => other,
            })?;
        let positions = mapping.ordered(features);

        let mut null_columns: BTreeMap<String, usize> = BTreeMap::new();
        let mut null_rows: BTreeSet<usize> = BTreeSet::new();
        for (feature, &col) in features.iter().zip(&positions) {
            for row in 0..table.len() {
                if table.cell(row, col).is_none() {
                    *null_columns.entry(feature.clone()).or_insert(0) += 1;
                    null_rows.insert(row + 1);
                }
            }
        }
        if !null_columns.is_empty() {
            return Err(AppError::NullValues {
                columns: null_columns,
                rows: null_rows.into_iter().collect(),
            });
        }

        let mut inputs = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let mut input = BTreeMap::new();
            for (feature, &col) in features.iter().zip(&positions) {
                let raw = table.cell(row, col).unwrap_or_default();
                let value = artifact.encode(feature, raw).ok_or_else(|| {
                    AppError::Validation(format!(
                        "row {}: column {} must be {}, got '{}'",
                        row + 1,
                        feature,
                        artifact.expected_values(feature),
                        raw
                    ))
                })?;
                input.insert(feature.clone(), value);
            }
            inputs.push(input);
        }

        let matrix = feature_matrix(features, &inputs)?;
        self.score(&artifact, matrix, inputs, threshold).await
    }

    async fn score(
        &self,
        artifact: &Arc<ModelArtifact>,
        matrix: Array2<f64>,
        inputs: Vec<BTreeMap<String, i64>>,
        threshold: f64,
    ) -> Result<PredictionBatch> {
        let model = artifact.clone();
        let probabilities = tokio::task::spawn_blocking(move || {
            model.forest.positive_probability(&matrix)
        })
        .await
        .map_err(|e| AppError::Internal(format!("prediction task failed: {}", e)))??;

        let predictions: Vec<PredictionResult> = inputs
            .into_iter()
            .zip(probabilities.iter())
            .enumerate()
            .map(|(index, (input, &p))| PredictionResult::new(index, input, p, threshold))
            .collect();

        for prediction in &predictions {
            metrics::record_prediction(&prediction.risk_level.to_string());
        }

        Ok(PredictionBatch {
            summary: PredictionSummary::from_results(&predictions),
            predictions,
            threshold_used: threshold,
        })
    }

    fn resolve_threshold(&self, threshold: Option<f64>) -> Result<f64> {
        let threshold = threshold.unwrap_or(self.pipeline.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Validation(format!(
                "threshold must be between 0 and 1, got {}",
                threshold
            )));
        }
        Ok(threshold)
    }

    /// Size, location and last metrics of the persisted model
    pub async fn model_info(&self) -> Result<ModelInfoReport> {
        let (model_name, metrics_name) = {
            let active = self.active.read().await;
            (active.model_name.clone(), active.metrics_name.clone())
        };

        let object = match self.storage.info(&model_name).await {
            Ok(info) => info,
            Err(AppError::StorageNotFound(_)) => {
                return Err(AppError::ModelNotLoaded(
                    "no trained model found; train a model first".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        let metrics = match self.storage.load_metrics(&metrics_name).await {
            Ok(metrics) => Some(metrics),
            Err(AppError::StorageNotFound(_)) => None,
            Err(e) => {
                warn!(error = %e, "Metrics document unreadable");
                None
            }
        };

        let (training_fields, target_field) = match self.current_artifact().await {
            Ok(artifact) => (
                artifact.feature_columns.clone(),
                artifact.target_column.clone(),
            ),
            Err(_) => (
                self.schema.features().to_vec(),
                self.schema.target().to_string(),
            ),
        };

        Ok(ModelInfoReport {
            model_info: ModelInfo {
                model_exists: true,
                model_size_bytes: object.size_bytes,
                model_size_mb: object.size_mb,
                last_modified: object.last_modified,
                model_location: object.location,
                metrics_location: self.storage.location(&metrics_name),
                training_fields,
                target_field,
                excluded_fields: self.schema.excluded().to_vec(),
            },
            metrics,
        })
    }
}

/// A training run detached from the request that started it
struct TrainingJob {
    pipeline: PipelineConfig,
    schema: FeatureSchema,
    storage: Arc<dyn ArtifactStorage>,
    active: Arc<RwLock<ActiveModel>>,
    training_lock: Arc<Mutex<()>>,
}

impl TrainingJob {
    async fn run(self, table: RawTable, request: TrainRequest) -> Result<TrainingReport> {
        let _guard = self.training_lock.lock().await;
        let started = Instant::now();

        let result = self.execute(table, request, started).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::record_training(outcome, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            error!(error = %e, "Training run failed");
        }
        result
    }

    async fn execute(
        &self,
        table: RawTable,
        request: TrainRequest,
        started: Instant,
    ) -> Result<TrainingReport> {
        let builder = DatasetBuilder::new(self.schema.clone());
        let mut options = TrainingOptions::from_config(&self.pipeline);
        options.hyperparameters = request.hyperparameters.clone();
        let target = request.target_col.clone();
        let total_records = table.len();

        info!(rows = total_records, target = ?target, "Starting training");

        let (dataset, outcome) = tokio::task::spawn_blocking(move || {
            let dataset = builder.build(&table, target.as_deref())?;
            let outcome = train_model(&dataset, &options)?;
            Ok::<_, AppError>((dataset, outcome))
        })
        .await
        .map_err(|e| AppError::Internal(format!("training task failed: {}", e)))??;

        let (model_name, metrics_name) = {
            let active = self.active.read().await;
            (
                request
                    .model_filename
                    .unwrap_or_else(|| active.model_name.clone()),
                request
                    .metrics_filename
                    .unwrap_or_else(|| active.metrics_name.clone()),
            )
        };

        let model_path = self.storage.save_model(&outcome.artifact, &model_name).await?;
        let metrics_path = self.storage.save_metrics(&outcome.metrics, &metrics_name).await?;

        let training_info = TrainingInfo {
            total_records,
            used_records: dataset.n_samples(),
            dropped_rows: dataset.dropped_rows,
            repaired_values: dataset.repaired_values,
            categorical_columns: dataset.categorical_columns(),
            target_column: dataset.target_name.clone(),
            features_used: dataset.feature_names.clone(),
            hyperparameter_profile: outcome.artifact.profile,
            duration_seconds: started.elapsed().as_secs_f64(),
        };

        {
            let mut active = self.active.write().await;
            active.artifact = Some(Arc::new(outcome.artifact));
            active.model_name = model_name;
            active.metrics_name = metrics_name;
        }

        info!(
            model = %model_path,
            metrics = %metrics_path,
            accuracy = outcome.metrics.accuracy,
            f1 = outcome.metrics.f1_score,
            "✅ Model trained and persisted"
        );

        Ok(TrainingReport {
            model_path,
            metrics_path,
            metrics: outcome.metrics,
            training_info,
        })
    }
}

/// Model input for a JSON value; strings and numbers both name categories
fn encode_json(artifact: &ModelArtifact, feature: &str, value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => artifact.encode(feature, s),
        Value::Number(n) if artifact.is_categorical(feature) => {
            artifact.encode(feature, &n.to_string())
        }
        _ if artifact.is_categorical(feature) => None,
        other => json_integer(other),
    }
}

/// Integer from a JSON number or numeric string
fn json_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(|f| parse_integer(&f.to_string()))),
        Value::String(s) => parse_integer(s),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Rows in `features` order
fn feature_matrix(features: &[String], inputs: &[BTreeMap<String, i64>]) -> Result<Array2<f64>> {
    let mut flat = Vec::with_capacity(inputs.len() * features.len());
    for input in inputs {
        for feature in features {
            let value = input.get(feature).ok_or_else(|| AppError::MissingFields {
                fields: vec![feature.clone()],
            })?;
            flat.push(*value as f64);
        }
    }
    Array2::from_shape_vec((inputs.len(), features.len()), flat)
        .map_err(|e| AppError::Internal(format!("feature matrix shape: {}", e)))
}

/// Append prediction columns to an uploaded table, row for row
pub fn append_predictions(table: &mut RawTable, predictions: &[PredictionResult]) -> Result<()> {
    table.push_column(
        "PREDICCION",
        predictions.iter().map(|p| p.prediction.to_string()).collect(),
    )?;
    table.push_column(
        "PROBABILIDAD",
        predictions
            .iter()
            .map(|p| format!("{:.4}", p.probability))
            .collect(),
    )?;
    table.push_column(
        "NIVEL_RIESGO",
        predictions.iter().map(|p| p.risk_level.to_string()).collect(),
    )?;
    table.push_column(
        "ES_ACCIDENTE",
        predictions
            .iter()
            .map(|p| p.accident_likely.to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::fixtures::record;
    use crate::state::create_in_memory_store;
    use crate::storage::LocalStorage;
    use serde_json::json;

    async fn service(dir: &std::path::Path) -> RiskModelService {
        let store = create_in_memory_store();
        let storage: Arc<dyn ArtifactStorage> = Arc::new(LocalStorage::new(dir));
        RiskModelService::new(
            PipelineConfig::default(),
            &ArtifactConfig::default(),
            store,
            storage,
        )
    }

    fn fast_request() -> TrainRequest {
        TrainRequest {
            hyperparameters: Some(Hyperparameters {
                n_estimators: 10,
                max_depth: Some(6),
                min_samples_split: 2,
                min_samples_leaf: 1,
                ..Hyperparameters::default_profile()
            }),
            ..Default::default()
        }
    }

    async fn seeded(dir: &std::path::Path) -> RiskModelService {
        let service = service(dir).await;
        let records: Vec<_> = (0..60).map(|i| record(i, i64::from(i % 3 == 0))).collect();
        service.store.insert_batch(records).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_predict_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        assert!(!service.warm_up().await.unwrap());

        let row = json!({"HORA_SINIESTRO": 1}).as_object().unwrap().clone();
        let err = service.predict(&[row], None).await.unwrap_err();
        assert_eq!(err.error_code(), "MODEL_NOT_LOADED");
        assert!(service.model_info().await.is_err());
    }

    #[tokio::test]
    async fn test_train_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let err = service.train(TrainRequest::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "EMPTY_DATASET");
    }

    #[tokio::test]
    async fn test_train_then_predict() {
        let dir = tempfile::tempdir().unwrap();
        let service = seeded(dir.path()).await;

        let report = service.train(fast_request()).await.unwrap();
        assert_eq!(report.training_info.total_records, 60);
        assert_eq!(report.metrics.feature_columns.len(), 18);
        assert!(report.model_path.ends_with("modelo_accidentes.bin"));
        assert!(service.is_loaded().await);

        let mut row = Map::new();
        for (i, feature) in service.schema().features().iter().enumerate() {
            row.insert(feature.clone(), json!(i % 3));
        }
        // numeric strings are accepted
        row.insert("MES".to_string(), json!("4"));
        let batch = service.predict(&[row], Some(0.5)).await.unwrap();
        assert_eq!(batch.predictions.len(), 1);
        assert_eq!(batch.summary.total_predictions, 1);
        assert_eq!(batch.threshold_used, 0.5);
        assert_eq!(batch.predictions[0].input_data["MES"], 4);

        let info = service.model_info().await.unwrap();
        assert!(info.model_info.model_exists);
        assert!(info.model_info.model_size_bytes > 0);
        assert!(info.metrics.is_some());
    }

    #[tokio::test]
    async fn test_threshold_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;
        let err = service.predict(&[Map::new()], Some(1.5)).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_predict_table_rejects_nulls_before_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let service = seeded(dir.path()).await;
        service.train(fast_request()).await.unwrap();

        let mut table = RawTable::from_records(&[record(1, 0), record(2, 1)]);
        let col = table.column_index("ZONA").unwrap();
        table.rows[1][col] = None;

        match service.predict_table(&table, None).await.unwrap_err() {
            AppError::NullValues { columns, rows } => {
                assert_eq!(columns.get("ZONA"), Some(&1));
                assert_eq!(rows, vec![2]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    fn feature_row(service: &RiskModelService) -> Map<String, Value> {
        service
            .schema()
            .features()
            .iter()
            .enumerate()
            .map(|(i, feature)| (feature.clone(), json!(i % 3)))
            .collect()
    }

    #[tokio::test]
    async fn test_artifact_names_must_stay_in_storage_root() {
        let dir = tempfile::tempdir().unwrap();
        let service = seeded(&dir.path().join("models")).await;

        let err = service
            .train(TrainRequest {
                model_filename: Some("./../escaped.bin".to_string()),
                ..fast_request()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = service
            .train(TrainRequest {
                metrics_filename: Some("/tmp/metrics.json".to_string()),
                ..fast_request()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        assert!(!dir.path().join("escaped.bin").exists());
        assert!(!dir.path().join("models").exists());
        assert!(!service.is_loaded().await);
    }

    /// Local files, with metrics writes lagging behind model writes
    struct SlowMetrics(LocalStorage);

    #[async_trait::async_trait]
    impl ArtifactStorage for SlowMetrics {
        fn backend_name(&self) -> &'static str {
            "slow"
        }

        fn location(&self, name: &str) -> String {
            self.0.location(name)
        }

        async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
            if name.ends_with(".json") {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            self.0.put(name, bytes).await
        }

        async fn get(&self, name: &str) -> Result<Vec<u8>> {
            self.0.get(name).await
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            self.0.exists(name).await
        }

        async fn info(&self, name: &str) -> Result<crate::storage::ObjectInfo> {
            self.0.info(name).await
        }
    }

    #[tokio::test]
    async fn test_training_finishes_when_caller_stops_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ArtifactStorage> = Arc::new(SlowMetrics(LocalStorage::new(dir.path())));
        let service = RiskModelService::new(
            PipelineConfig::default(),
            &ArtifactConfig::default(),
            create_in_memory_store(),
            storage.clone(),
        );
        let records: Vec<_> = (0..60).map(|i| record(i, i64::from(i % 3 == 0))).collect();
        service.store.insert_batch(records).await.unwrap();

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            service.train(fast_request()),
        )
        .await;
        assert!(waited.is_err());

        for _ in 0..250 {
            if service.is_loaded().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(service.is_loaded().await);

        let config = ArtifactConfig::default();
        let served = service.current_artifact().await.unwrap();
        let persisted = storage.load_model(&config.model_filename).await.unwrap();
        let metrics = storage.load_metrics(&config.metrics_filename).await.unwrap();
        assert_eq!(persisted.trained_at, served.trained_at);
        assert_eq!(metrics.feature_columns, served.feature_columns);
        assert!(metrics.timestamp <= served.trained_at);
    }

    #[tokio::test]
    async fn test_categorical_feature_predicts_with_its_values() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let records: Vec<_> = (0..60).map(|i| record(i, i64::from(i % 3 == 0))).collect();
        let mut table = RawTable::from_records(&records);
        let col = table.column_index("ZONA").unwrap();
        for (i, row) in table.rows.iter_mut().enumerate() {
            row[col] = Some(if i % 2 == 0 { "norte" } else { "sur" }.to_string());
        }

        let report = service
            .train_on_table(table.clone(), fast_request())
            .await
            .unwrap();
        assert_eq!(report.training_info.categorical_columns, vec!["ZONA"]);

        let mut row = feature_row(&service);
        row.insert("ZONA".to_string(), json!("sur"));
        let batch = service.predict(&[row.clone()], None).await.unwrap();
        assert_eq!(batch.predictions[0].input_data["ZONA"], 1);

        row.insert("ZONA".to_string(), json!("este"));
        let err = service.predict(&[row], None).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("norte, sur"));

        let batch = service.predict_table(&table, None).await.unwrap();
        assert_eq!(batch.predictions.len(), 60);

        // the value table travels with the persisted model
        let reloaded = RiskModelService::new(
            PipelineConfig::default(),
            &ArtifactConfig::default(),
            create_in_memory_store(),
            Arc::new(LocalStorage::new(dir.path())),
        );
        let mut row = feature_row(&reloaded);
        row.insert("ZONA".to_string(), json!("norte"));
        let batch = reloaded.predict(&[row], None).await.unwrap();
        assert_eq!(batch.predictions[0].input_data["ZONA"], 0);
    }

    #[tokio::test]
    async fn test_missing_fields_reported_before_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let service = seeded(dir.path()).await;
        service.train(fast_request()).await.unwrap();

        let mut first = feature_row(&service);
        first.insert("ZONA".to_string(), json!("norte"));
        let mut second = feature_row(&service);
        second.remove("DISTRITO");

        match service.predict(&[first, second], None).await.unwrap_err() {
            AppError::MissingFields { fields } => assert_eq!(fields, vec!["DISTRITO"]),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_json_integer() {
        assert_eq!(json_integer(&json!(3)), Some(3));
        assert_eq!(json_integer(&json!(3.0)), Some(3));
        assert_eq!(json_integer(&json!("7")), Some(7));
        assert_eq!(json_integer(&json!("x")), None);
        assert_eq!(json_integer(&json!(2.5)), None);
    }
}
