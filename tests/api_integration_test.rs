//! HTTP surface tests driven through the router without a listener.

mod common;

use accident_risk::{
    api::{build_router, AppState},
    ml::TrainRequest,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "accident-risk-boundary";

fn router(ctx: &TestContext) -> Router {
    build_router(AppState::new(
        ctx.service.clone(),
        ctx.ingestion.clone(),
        ctx.store.clone(),
    ))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let (status, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// multipart/form-data with one CSV file part and plain text fields
fn multipart(uri: &str, filename: &str, csv: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n--{BOUNDARY}--\r\n"
    ));

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn trained_context() -> TestContext {
    let ctx = context();
    seed_store(&ctx.store, labelled_records(60, 3)).await;
    ctx.service.train(TrainRequest::default()).await.unwrap();
    ctx
}

#[tokio::test]
async fn test_health_and_metrics() {
    accident_risk::metrics::init_metrics().unwrap();
    let ctx = context();
    let app = router(&ctx);

    let (status, body) = send_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], false);

    let (status, bytes) = send(
        &app,
        Request::builder().uri("/metrics").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("accident_risk_http_requests_total"));
}

#[tokio::test]
async fn test_predict_before_training_is_not_loaded() {
    let ctx = context();
    let app = router(&ctx);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/predict/",
        Some(json!({ "data": feature_json(&record(1, 0)) })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "MODEL_NOT_LOADED");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.contains(ctx.dir.path().to_str().unwrap()));
    assert!(!message.contains(".bin"));
}

#[tokio::test]
async fn test_train_endpoint_reports_metrics() {
    let ctx = context();
    seed_store(&ctx.store, labelled_records(60, 3)).await;
    let app = router(&ctx);

    let (status, body) = send_json(&app, Method::POST, "/api/train-model/", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["training_info"]["total_records"], 60);
    assert_eq!(body["metrics"]["feature_columns"].as_array().unwrap().len(), 18);
    assert!(body["metrics"]["confusion_matrix"].is_object());

    let (status, body) = send_json(&app, Method::GET, "/api/model-info/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_info"]["model_exists"], true);
    assert!(body["model_info"]["model_size_bytes"].as_u64().unwrap() > 0);
    assert_eq!(body["model_info"]["target_field"], "ACCIDENTE");
}

#[tokio::test]
async fn test_train_on_empty_store_is_rejected() {
    let ctx = context();
    let app = router(&ctx);

    let (status, body) = send_json(&app, Method::POST, "/api/train-model/", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "EMPTY_DATASET");
}

#[tokio::test]
async fn test_malformed_train_body_is_rejected() {
    let ctx = context();
    seed_store(&ctx.store, labelled_records(60, 3)).await;
    let app = router(&ctx);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/train-model/",
        Some(json!({"target_col": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/train-model/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("retrain please"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(!ctx.service.is_loaded().await);
}

#[tokio::test]
async fn test_train_rejects_artifact_paths() {
    let ctx = context();
    seed_store(&ctx.store, labelled_records(60, 3)).await;
    let app = router(&ctx);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/train-model/",
        Some(json!({"model_filename": "./../x.bin"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(!ctx.service.is_loaded().await);

    let (status, body) = send_json(&app, Method::GET, "/api/model-info/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "MODEL_NOT_LOADED");
}

#[tokio::test]
async fn test_missing_field_is_listed_once() {
    let ctx = trained_context().await;
    let app = router(&ctx);

    let rows: Vec<Value> = (0..5)
        .map(|i| {
            let mut row = feature_json(&record(i, 0));
            if i == 1 || i == 3 {
                row.remove("DISTRITO");
            }
            Value::Object(row)
        })
        .collect();

    let (status, body) =
        send_json(&app, Method::POST, "/api/predict/", Some(json!({ "data": rows }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MISSING_FIELDS");
    assert_eq!(body["details"]["missing_fields"], json!(["DISTRITO"]));
}

#[tokio::test]
async fn test_predict_single_and_list() {
    let ctx = trained_context().await;
    let app = router(&ctx);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/predict/",
        Some(json!({ "data": feature_json(&record(3, 1)), "threshold": 0.4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["threshold_used"], 0.4);
    assert_eq!(body["predictions"].as_array().unwrap().len(), 1);

    let rows: Vec<Value> = (0..4).map(|i| Value::Object(feature_json(&record(i, 1)))).collect();
    let (status, body) =
        send_json(&app, Method::POST, "/api/predict/", Some(json!({ "data": rows }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_predictions"], 4);

    for prediction in body["predictions"].as_array().unwrap() {
        let p = prediction["probability"].as_f64().unwrap();
        let expected = if p > 0.7 {
            "Alto"
        } else if p > 0.3 {
            "Medio"
        } else {
            "Bajo"
        };
        assert_eq!(prediction["risk_level"], expected);
    }
}

#[tokio::test]
async fn test_predict_rejects_bad_requests() {
    let ctx = trained_context().await;
    let app = router(&ctx);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/predict/",
        Some(json!({ "data": feature_json(&record(3, 1)), "threshold": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) =
        send_json(&app, Method::POST, "/api/predict/", Some(json!({ "rows": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_batch_predict_json_and_csv() {
    let ctx = trained_context().await;
    let app = router(&ctx);
    let csv = prediction_csv(&labelled_records(6, 2));

    let (status, bytes) = send(
        &app,
        multipart("/api/batch-predict/", "lote.csv", &csv, &[("threshold", "0.5")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["summary"]["total_predictions"], 6);
    assert_eq!(body["summary"]["file_info"]["filename"], "lote.csv");
    assert_eq!(body["summary"]["file_info"]["rows_processed"], 6);

    let response = app
        .clone()
        .oneshot(multipart(
            "/api/batch-predict/",
            "lote.csv",
            &csv,
            &[("output_format", "csv")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("predicciones_"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let header_line = text.lines().next().unwrap();
    assert!(header_line.ends_with("PREDICCION,PROBABILIDAD,NIVEL_RIESGO,ES_ACCIDENTE"));
    assert_eq!(text.lines().count(), 7);
}

#[tokio::test]
async fn test_batch_predict_rejects_non_csv_and_nulls() {
    let ctx = trained_context().await;
    let app = router(&ctx);

    let (status, bytes) = send(
        &app,
        multipart("/api/batch-predict/", "lote.xlsx", "HORA_SINIESTRO\n1\n", &[]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let mut csv = prediction_csv(&labelled_records(3, 2));
    csv = csv.replacen("\n0,", "\n,", 1);
    let (status, bytes) = send(&app, multipart("/api/batch-predict/", "lote.csv", &csv, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "NULL_VALUES");
    assert_eq!(body["details"]["null_rows"], json!([1]));
}

#[tokio::test]
async fn test_upload_and_train() {
    let ctx = context();
    let app = router(&ctx);
    let csv = ingestion_csv(&labelled_records(50, 2));

    let (status, bytes) = send(
        &app,
        multipart("/api/upload-and-train/", "datos.csv", &csv, &[]),
    )
    .await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["records_created"], 50);
    assert_eq!(body["retrain"]["success"], true);
    assert!(ctx.service.is_loaded().await);

    let (status, bytes) = send(
        &app,
        multipart(
            "/api/upload-and-train/",
            "datos.csv",
            &csv,
            &[("auto_train", "false")],
        ),
    )
    .await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records_created"], 50);
    assert!(body["retrain"].is_null());
}

#[tokio::test]
async fn test_upload_with_too_many_errors_is_unprocessable() {
    let ctx = context();
    let app = router(&ctx);
    let rows: Vec<Vec<String>> = labelled_records(20, 2)
        .iter()
        .map(|r| {
            let mut row = ingestion_row(r);
            row[0] = "x".to_string();
            row
        })
        .collect();

    let (status, bytes) = send(
        &app,
        multipart(
            "/api/upload-and-train/",
            "datos.csv",
            &to_csv(&ingestion_header(), &rows),
            &[],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "INGESTION_ABORTED");
    assert_eq!(body["details"]["records_errors"], 20);
    assert_eq!(body["details"]["threshold"], 10);
}

#[tokio::test]
async fn test_downloads() {
    let ctx = trained_context().await;
    let app = router(&ctx);

    let (status, bytes) = send(
        &app,
        Request::builder()
            .uri("/api/download-csv/?limit=5&include_predictions=true")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(text.lines().count(), 6);
    assert!(text
        .lines()
        .next()
        .unwrap()
        .ends_with("PREDICCION_ACCIDENTE,PROBABILIDAD_ACCIDENTE,NIVEL_RIESGO"));

    let (status, bytes) = send(
        &app,
        Request::builder()
            .uri("/api/download-template/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HORA_SINIESTRO,CLASE_SINIESTRO"));
    assert_eq!(text.lines().count(), 3);

    let (status, bytes) = send(
        &app,
        Request::builder()
            .uri("/api/download-data-template/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.lines().next().unwrap().ends_with("ACCIDENTE,FECHA_SINIESTRO"));
}

#[tokio::test]
async fn test_download_csv_on_empty_store_is_not_found() {
    let ctx = context();
    let app = router(&ctx);

    let (status, body) = send_json(&app, Method::GET, "/api/download-csv/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_record_crud() {
    let ctx = context();
    let app = router(&ctx);
    let payload = serde_json::to_value(record(4, 1)).unwrap();

    let (status, created) =
        send_json(&app, Method::POST, "/api/siniestros/", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().unwrap();
    assert!(id > 0);

    let (status, fetched) =
        send_json(&app, Method::GET, &format!("/api/siniestros/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["HORA_SINIESTRO"], 4);

    let mut changed = payload.clone();
    changed["DISTRITO"] = json!(31);
    let (status, updated) =
        send_json(&app, Method::PUT, &format!("/api/siniestros/{id}"), Some(changed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["DISTRITO"], 31);
    assert_eq!(updated["id"], id);

    let mut invalid = payload.clone();
    invalid["ACCIDENTE"] = json!(3);
    let (status, body) =
        send_json(&app, Method::POST, "/api/siniestros/", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, list) = send_json(&app, Method::GET, "/api/siniestros/?page=1&page_size=500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["page_size"], 100);

    let (status, _) =
        send_json(&app, Method::DELETE, &format!("/api/siniestros/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) =
        send_json(&app, Method::GET, &format!("/api/siniestros/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
