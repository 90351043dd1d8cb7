//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use accident_risk::{
    config::{ArtifactConfig, PipelineConfig},
    ingestion::IngestionPipeline,
    ml::RiskModelService,
    models::{IncidentRecord, FEATURE_COLUMNS, TARGET_COLUMN},
    state::{create_in_memory_store, RecordStore},
    storage::LocalStorage,
};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Record whose features derive from `seed`.
///
/// Accidents carry CLASE_SINIESTRO 4 or 5 and SENALIZACION 5, which the
/// forest can separate from the negatives.
pub fn record(seed: i64, accident: i64) -> IncidentRecord {
    let mut values: HashMap<String, i64> = FEATURE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| (c.to_string(), (seed + i as i64) % 5))
        .collect();
    values.insert("HORA_SINIESTRO".to_string(), seed % 24);
    values.insert("MES".to_string(), seed % 12 + 1);
    values.insert("DIA_DE_LA_SEMANA".to_string(), seed % 7);
    if accident == 1 {
        values.insert("CLASE_SINIESTRO".to_string(), 4 + seed % 2);
        values.insert("SENALIZACION".to_string(), 5);
    } else {
        values.insert("CLASE_SINIESTRO".to_string(), seed % 3);
        values.insert("SENALIZACION".to_string(), seed % 2);
    }
    values.insert(TARGET_COLUMN.to_string(), accident);

    let date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
    IncidentRecord::from_values(&values, date, date).unwrap()
}

/// `n` records where every `positive_every`-th one is an accident
pub fn labelled_records(n: usize, positive_every: usize) -> Vec<IncidentRecord> {
    (0..n)
        .map(|i| record(i as i64, i64::from(i % positive_every == 0)))
        .collect()
}

/// Ingestion CSV header: features, target, incident date
pub fn ingestion_header() -> Vec<String> {
    let mut header: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.push(TARGET_COLUMN.to_string());
    header.push("FECHA_SINIESTRO".to_string());
    header
}

/// One ingestion CSV row for `record`
pub fn ingestion_row(record: &IncidentRecord) -> Vec<String> {
    let mut row: Vec<String> = FEATURE_COLUMNS
        .iter()
        .map(|c| record.value(c).unwrap_or_default().to_string())
        .collect();
    row.push(record.accidente.to_string());
    row.push(record.fecha_siniestro.format("%Y-%m-%d").to_string());
    row
}

pub fn to_csv(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = header.join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

pub fn ingestion_csv(records: &[IncidentRecord]) -> String {
    let rows: Vec<Vec<String>> = records.iter().map(ingestion_row).collect();
    to_csv(&ingestion_header(), &rows)
}

/// Feature-only CSV for batch prediction
pub fn prediction_csv(records: &[IncidentRecord]) -> String {
    let header: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            FEATURE_COLUMNS
                .iter()
                .map(|c| r.value(c).unwrap_or_default().to_string())
                .collect()
        })
        .collect();
    to_csv(&header, &rows)
}

/// JSON object with every feature of `record`
pub fn feature_json(record: &IncidentRecord) -> Map<String, Value> {
    FEATURE_COLUMNS
        .iter()
        .map(|c| (c.to_string(), Value::from(record.value(c).unwrap_or_default())))
        .collect()
}

/// Service, ingestion pipeline and store over an in-memory store and a temp dir
pub struct TestContext {
    pub service: Arc<RiskModelService>,
    pub ingestion: Arc<IngestionPipeline>,
    pub store: Arc<dyn RecordStore>,
    pub dir: TempDir,
}

pub fn fast_pipeline() -> PipelineConfig {
    PipelineConfig {
        random_seed: 7,
        ..PipelineConfig::default()
    }
}

pub fn context_with(pipeline: PipelineConfig) -> TestContext {
    let dir = TempDir::new().unwrap();
    let store = create_in_memory_store();
    let storage = Arc::new(LocalStorage::new(dir.path()));
    let service = Arc::new(RiskModelService::new(
        pipeline.clone(),
        &ArtifactConfig::default(),
        store.clone(),
        storage,
    ));
    let ingestion = Arc::new(
        IngestionPipeline::new(pipeline, store.clone()).with_service(service.clone()),
    );

    TestContext {
        service,
        ingestion,
        store,
        dir,
    }
}

pub fn context() -> TestContext {
    context_with(fast_pipeline())
}

pub async fn seed_store(store: &Arc<dyn RecordStore>, records: Vec<IncidentRecord>) {
    store.insert_batch(records).await.unwrap();
}
