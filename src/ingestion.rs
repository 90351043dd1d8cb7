//! CSV ingestion into the record store, with optional retraining.

use crate::config::PipelineConfig;
use crate::error::{AppError, Result, RowError};
use crate::metrics;
use crate::ml::{MetricsDocument, RiskModelService, TrainRequest};
use crate::models::{IncidentRecord, FEATURE_COLUMNS, TARGET_COLUMN};
use crate::schema::FeatureSchema;
use crate::state::RecordStore;
use crate::table::{parse_integer, RawTable};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

/// Accepted incident date layouts, tried in order
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse an incident date in any accepted layout
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Result of the automatic retrain that follows a successful ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub total_rows: usize,
    pub records_created: usize,
    pub records_errors: usize,
    pub dates_fixed: usize,
    pub row_errors: Vec<RowError>,
    pub created_ids: Vec<u64>,
    pub retrain: Option<RetrainOutcome>,
}

/// Validates uploaded tables and commits them to the store as one batch
pub struct IngestionPipeline {
    config: PipelineConfig,
    schema: FeatureSchema,
    store: Arc<dyn RecordStore>,
    service: Option<Arc<RiskModelService>>,
}

impl IngestionPipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            schema: FeatureSchema::from_config(&config),
            config,
            store,
            service: None,
        }
    }

    /// Retrain through `service` after rows are committed
    pub fn with_service(mut self, service: Arc<RiskModelService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Columns every uploaded row must carry
    fn required_columns() -> Vec<String> {
        FEATURE_COLUMNS
            .iter()
            .chain(std::iter::once(&TARGET_COLUMN))
            .map(|c| c.to_string())
            .collect()
    }

    /// Validate `table` and insert its valid rows.
    ///
    /// Checks run in order: required columns, nulls in non-date columns,
    /// per-row integer coercion, then incident dates (blank or unparseable
    /// dates take the configured fallback). More than `max_row_errors`
    /// rejected rows aborts the batch with nothing committed.
    pub async fn ingest(&self, table: &RawTable, retrain: bool) -> Result<IngestionReport> {
        if table.is_empty() {
            return Err(AppError::EmptyDataset("the uploaded file has no rows".to_string()));
        }

        let required = Self::required_columns();
        let mapping = self.schema.reconcile(&table.columns, &required)?;
        let positions: Vec<usize> = mapping.ordered(&required);
        let date_position = mapping.index_of(self.schema.date_column());

        let mut null_columns: BTreeMap<String, usize> = BTreeMap::new();
        let mut null_rows: Vec<usize> = Vec::new();
        for row in 0..table.len() {
            let mut row_has_null = false;
            for (column, &pos) in required.iter().zip(&positions) {
                if table.cell(row, pos).is_none() {
                    *null_columns.entry(column.clone()).or_insert(0) += 1;
                    row_has_null = true;
                }
            }
            if row_has_null {
                null_rows.push(row + 1);
            }
        }
        if !null_columns.is_empty() {
            warn!(columns = ?null_columns, "Rejecting upload with null values");
            return Err(AppError::NullValues {
                columns: null_columns,
                rows: null_rows,
            });
        }

        let today = Utc::now().date_naive();
        let fallback = self.config.date_fallback.resolve(today);

        let mut records = Vec::with_capacity(table.len());
        let mut row_errors = Vec::new();
        let mut dates_fixed = 0;

        for row in 0..table.len() {
            let mut values = HashMap::with_capacity(required.len());
            let mut bad_columns = Vec::new();
            for (column, &pos) in required.iter().zip(&positions) {
                let raw = table.cell(row, pos).unwrap_or_default();
                match parse_integer(raw) {
                    Some(v) => {
                        values.insert(column.clone(), v);
                    }
                    None => bad_columns.push((column.clone(), raw.to_string())),
                }
            }

            if let Some((first, _)) = bad_columns.first() {
                row_errors.push(RowError {
                    row: row + 1,
                    column: Some(first.clone()),
                    message: bad_columns
                        .iter()
                        .map(|(c, v)| format!("{} is not an integer ('{}')", c, v))
                        .collect::<Vec<_>>()
                        .join("; "),
                });
                continue;
            }

            let fecha = match date_position.and_then(|pos| table.cell(row, pos)) {
                Some(raw) => match parse_date(raw) {
                    Some(date) => date,
                    None => {
                        dates_fixed += 1;
                        fallback
                    }
                },
                None => {
                    dates_fixed += 1;
                    fallback
                }
            };

            let record = IncidentRecord::from_values(&values, fecha, today)?;
            if let Err(e) = record.validate() {
                row_errors.push(RowError {
                    row: row + 1,
                    column: e.field_errors().keys().next().map(|f| f.to_uppercase()),
                    message: e.to_string(),
                });
                continue;
            }
            records.push(record);
        }

        if row_errors.len() > self.config.max_row_errors {
            warn!(
                errors = row_errors.len(),
                threshold = self.config.max_row_errors,
                "Ingestion aborted, nothing committed"
            );
            metrics::record_ingested(0, table.len());
            return Err(AppError::IngestionAborted {
                errors: row_errors,
                threshold: self.config.max_row_errors,
            });
        }

        let created_ids = if records.is_empty() {
            Vec::new()
        } else {
            self.store.insert_batch(records).await?
        };
        metrics::record_ingested(created_ids.len(), row_errors.len());

        info!(
            rows = table.len(),
            created = created_ids.len(),
            rejected = row_errors.len(),
            dates_fixed,
            "Ingested upload"
        );

        let retrain = if retrain && self.config.auto_retrain && !created_ids.is_empty() {
            self.retrain().await
        } else {
            None
        };

        Ok(IngestionReport {
            total_rows: table.len(),
            records_created: created_ids.len(),
            records_errors: row_errors.len(),
            dates_fixed,
            row_errors,
            created_ids,
            retrain,
        })
    }

    /// A failed retrain is reported; the committed rows stay
    async fn retrain(&self) -> Option<RetrainOutcome> {
        let service = self.service.as_ref()?;
        Some(match service.train(TrainRequest::default()).await {
            Ok(report) => RetrainOutcome {
                success: true,
                model_path: Some(report.model_path),
                metrics: Some(report.metrics),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Retraining after ingestion failed");
                RetrainOutcome {
                    success: false,
                    model_path: None,
                    metrics: None,
                    error: Some(e.to_string()),
                }
            }
        })
    }
}
