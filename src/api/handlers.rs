use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::ingestion::IngestionReport;
use crate::metrics;
use crate::ml::{append_predictions, ModelInfo, PredictionBatch, TrainRequest, TrainingReport};
use crate::models::*;
use crate::state::RecordFilter;
use crate::table::RawTable;
use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{info, warn};
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        model_loaded: state.service.is_loaded().await,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model_loaded: bool,
}

/// Prometheus exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ============================================================================
// Model pipeline
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TrainModelResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: TrainingReport,
}

/// Train on every stored record; an empty body trains with the defaults
pub async fn train_model(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TrainModelResponse>> {
    let request = parse_train_request(&body)?;
    let report = state.service.train(request).await?;
    Ok(Json(TrainModelResponse {
        success: true,
        report,
    }))
}

fn parse_train_request(body: &[u8]) -> Result<TrainRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TrainRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("invalid training request: {}", e)))
}

/// One record or a list of records
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PredictData {
    Many(Vec<Map<String, Value>>),
    One(Map<String, Value>),
}

impl PredictData {
    pub fn into_rows(self) -> Vec<Map<String, Value>> {
        match self {
            PredictData::Many(rows) => rows,
            PredictData::One(row) => vec![row],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub data: PredictData,
    pub threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(flatten)]
    pub batch: PredictionBatch,
}

pub async fn predict(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<PredictResponse>> {
    let request: PredictRequest = serde_json::from_value(body).map_err(|e| {
        AppError::Validation(format!(
            "expected {{\"data\": {{...}} | [{{...}}], \"threshold\"?}}: {}",
            e
        ))
    })?;

    let rows = request.data.into_rows();
    let batch = state.service.predict(&rows, request.threshold).await?;
    Ok(Json(PredictResponse {
        success: true,
        batch,
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub success: bool,
    pub model_info: ModelInfo,
    pub metrics: Option<crate::ml::MetricsDocument>,
}

pub async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfoResponse>> {
    let report = state.service.model_info().await?;
    Ok(Json(ModelInfoResponse {
        success: true,
        model_info: report.model_info,
        metrics: report.metrics,
    }))
}

/// Uploaded CSV plus the plain form fields sent with it
struct Upload {
    filename: String,
    bytes: Bytes,
    fields: HashMap<String, String>,
}

impl Upload {
    fn table(&self) -> Result<RawTable> {
        RawTable::from_csv_bytes(&self.bytes)
    }

    fn threshold(&self) -> Result<Option<f64>> {
        self.fields
            .get("threshold")
            .filter(|t| !t.trim().is_empty())
            .map(|t| {
                t.trim().parse::<f64>().map_err(|_| {
                    AppError::Validation(format!("threshold must be a number, got '{}'", t))
                })
            })
            .transpose()
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        match self.fields.get(name).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "false" || v == "0" || v == "no" => false,
            Some(v) if v == "true" || v == "1" || v == "yes" => true,
            _ => default,
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload> {
    let mut file: Option<(String, Bytes)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" || name == "csv_file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            file = Some((filename, field.bytes().await?));
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| AppError::Validation("no file was uploaded".to_string()))?;
    if !filename.to_ascii_lowercase().ends_with(".csv") {
        return Err(AppError::Validation(format!(
            "only .csv files are accepted, got '{}'",
            filename
        )));
    }
    if bytes.is_empty() {
        return Err(AppError::Validation("the uploaded file is empty".to_string()));
    }

    Ok(Upload {
        filename,
        bytes,
        fields,
    })
}

fn csv_attachment(filename: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub rows_processed: usize,
    pub columns_found: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub summary: PredictionSummary,
    pub file_info: FileInfo,
}

#[derive(Debug, Serialize)]
pub struct BatchPredictResponse {
    pub success: bool,
    pub predictions: Vec<PredictionResult>,
    pub summary: BatchSummary,
    pub threshold_used: f64,
}

/// Score an uploaded CSV; `output_format=csv` returns the annotated file
pub async fn batch_predict(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response> {
    let upload = read_upload(multipart).await?;
    let mut table = upload.table()?;
    let threshold = upload.threshold()?;
    let format = upload
        .fields
        .get("output_format")
        .map(|f| f.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "json".to_string());
    if format != "json" && format != "csv" {
        return Err(AppError::Validation(format!(
            "output_format must be 'json' or 'csv', got '{}'",
            format
        )));
    }

    let batch = state.service.predict_table(&table, threshold).await?;
    info!(
        file = %upload.filename,
        rows = table.len(),
        accidents = batch.summary.accidents_predicted,
        "Batch prediction completed"
    );

    if format == "csv" {
        append_predictions(&mut table, &batch.predictions)?;
        let filename = format!("predicciones_{}.csv", timestamp());
        return Ok(csv_attachment(&filename, table.to_csv_bytes()?));
    }

    let file_info = FileInfo {
        filename: upload.filename,
        rows_processed: table.len(),
        columns_found: table.columns,
    };
    Ok(Json(BatchPredictResponse {
        success: true,
        predictions: batch.predictions,
        summary: BatchSummary {
            summary: batch.summary,
            file_info,
        },
        threshold_used: batch.threshold_used,
    })
    .into_response())
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub report: IngestionReport,
}

/// Ingest full records from CSV; retrains unless `auto_train=false`
pub async fn upload_and_train(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let upload = read_upload(multipart).await?;
    let table = upload.table()?;
    let report = state
        .ingestion
        .ingest(&table, upload.flag("auto_train", true))
        .await?;

    let message = match &report.retrain {
        Some(r) if r.success => format!(
            "{} records created and the model was retrained",
            report.records_created
        ),
        Some(_) => format!(
            "{} records created; retraining failed",
            report.records_created
        ),
        None => format!("{} records created", report.records_created),
    };

    Ok(Json(UploadResponse {
        success: true,
        message,
        report,
    }))
}

// ============================================================================
// Exports
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_predictions: bool,
}

/// Export stored records, optionally scored by the current model
pub async fn download_csv(
    State(state): State<AppState>,
    Query(params): Query<DownloadQuery>,
) -> Result<Response> {
    let mut records = state.store.all_records(&RecordFilter::default()).await?;
    if let Some(limit) = params.limit {
        records.truncate(limit);
    }
    if records.is_empty() {
        return Err(AppError::NotFound("no records found in the store".to_string()));
    }

    let mut table = RawTable::from_records(&records);
    if params.include_predictions {
        match state.service.predict_table(&table, None).await {
            Ok(batch) => {
                let p = &batch.predictions;
                table.push_column(
                    "PREDICCION_ACCIDENTE",
                    p.iter().map(|r| r.prediction.to_string()).collect(),
                )?;
                table.push_column(
                    "PROBABILIDAD_ACCIDENTE",
                    p.iter().map(|r| format!("{:.4}", r.probability)).collect(),
                )?;
                table.push_column(
                    "NIVEL_RIESGO",
                    p.iter().map(|r| r.risk_level.to_string()).collect(),
                )?;
            }
            Err(e) => warn!(error = %e, "Exporting without predictions"),
        }
    }

    let filename = format!("siniestros_data_{}.csv", timestamp());
    Ok(csv_attachment(&filename, table.to_csv_bytes()?))
}

/// Example feature values for the two template rows
const TEMPLATE_ROWS: [(&str, i64, i64); 18] = [
    ("HORA_SINIESTRO", 14, 8),
    ("CLASE_SINIESTRO", 1, 2),
    ("CANTIDAD_DE_VEHICULOS_DANADOS", 2, 1),
    ("DISTRITO", 15, 10),
    ("ZONA", 1, 2),
    ("TIPO_DE_VIA", 2, 1),
    ("RED_VIAL", 1, 2),
    ("EXISTE_CICLOVIA", 0, 1),
    ("CONDICION_CLIMATICA", 1, 2),
    ("ZONIFICACION", 2, 1),
    ("CARACTERISTICAS_DE_VIA", 1, 2),
    ("PERFIL_LONGITUDINAL_VIA", 1, 2),
    ("SUPERFICIE_DE_CALZADA", 1, 2),
    ("SENALIZACION", 1, 2),
    ("DIA_DE_LA_SEMANA", 3, 1),
    ("MES", 6, 12),
    ("PERIODO_DEL_DIA", 2, 1),
    ("FERIADO", 0, 1),
];

fn template_table(features: &[String]) -> RawTable {
    let example = |pick: fn(&(&str, i64, i64)) -> i64| -> Vec<Option<String>> {
        features
            .iter()
            .map(|f| {
                let value = TEMPLATE_ROWS
                    .iter()
                    .find(|row| row.0 == f.as_str())
                    .map_or(0, pick);
                Some(value.to_string())
            })
            .collect()
    };

    let mut table = RawTable::new(features.to_vec());
    table.rows.push(example(|row| row.1));
    table.rows.push(example(|row| row.2));
    table
}

/// Prediction template: feature columns and two example rows
pub async fn download_template(State(state): State<AppState>) -> Result<Response> {
    let table = template_table(state.service.schema().features());
    Ok(csv_attachment(
        "plantilla_predicciones.csv",
        table.to_csv_bytes()?,
    ))
}

/// Ingestion template: features, target and incident date
pub async fn download_data_template(State(state): State<AppState>) -> Result<Response> {
    let schema = state.service.schema();
    let mut table = template_table(schema.features());
    table.push_column(schema.target(), vec!["1".to_string(), "0".to_string()])?;
    table.push_column(
        schema.date_column(),
        vec!["2024-06-12".to_string(), "2024-12-02".to_string()],
    )?;
    Ok(csv_attachment("plantilla_datos.csv", table.to_csv_bytes()?))
}

// ============================================================================
// Record management
// ============================================================================

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListRecordsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub accidente: Option<i64>,
    pub distrito: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListRecordsResponse {
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<IncidentRecord>,
}

/// List records, newest first; `page` is 1-based
pub async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<ListRecordsQuery>,
) -> Result<Json<ListRecordsResponse>> {
    let filter = RecordFilter {
        accidente: params.accidente,
        distrito: params.distrito,
        date_from: params.date_from,
        date_to: params.date_to,
    };
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, MAX_PAGE_SIZE);

    let results = state.store.list_records(&filter, page - 1, page_size).await?;
    let count = state.store.count_records(&filter).await?;

    Ok(Json(ListRecordsResponse {
        count,
        page,
        page_size,
        results,
    }))
}

pub async fn create_record(
    State(state): State<AppState>,
    Json(record): Json<IncidentRecord>,
) -> Result<(StatusCode, Json<IncidentRecord>)> {
    record.validate()?;
    let created = state.store.insert_record(record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<IncidentRecord>> {
    state
        .store
        .get_record(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Record {} not found", id)))
}

pub async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(mut record): Json<IncidentRecord>,
) -> Result<Json<IncidentRecord>> {
    record.id = id;
    record.validate()?;
    state.store.update_record(&record).await?;
    Ok(Json(record))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode> {
    state.store.delete_record(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
