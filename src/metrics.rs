//! Prometheus metrics for the HTTP surface and the model pipeline.
//!
//! Metrics live in a process-wide registry and are exported in the text
//! exposition format at `GET /metrics`.
//!
//! # Example
//! ```no_run
//! use accident_risk::metrics;
//!
//! metrics::init_metrics().unwrap();
//! metrics::record_prediction("Alto");
//! println!("{}", metrics::gather_metrics());
//! ```

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Instant;

const NAMESPACE: &str = "accident_risk";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Labels: method, path, status
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Pipeline Metrics
    // ============================================================================

    /// Labels: outcome (success | failure)
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Total number of training runs")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create TRAINING_RUNS_TOTAL metric");

    pub static ref TRAINING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("training_duration_seconds", "Training run duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    ).expect("Failed to create TRAINING_DURATION_SECONDS metric");

    /// Labels: risk_level (Alto | Medio | Bajo)
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of scored records")
            .namespace(NAMESPACE),
        &["risk_level"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Labels: outcome (created | rejected)
    pub static ref INGESTED_ROWS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("ingested_rows_total", "Total number of ingested CSV rows")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create INGESTED_ROWS_TOTAL metric");
}

static REGISTERED: OnceCell<()> = OnceCell::new();

/// Register every metric with [`PROMETHEUS_REGISTRY`]; later calls are no-ops
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTERED.get_or_try_init(|| {
        PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(TRAINING_RUNS_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(TRAINING_DURATION_SECONDS.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(INGESTED_ROWS_TOTAL.clone()))?;
        tracing::info!("Prometheus metrics initialized successfully");
        Ok::<(), prometheus::Error>(())
    })?;
    Ok(())
}

pub fn record_training(outcome: &str, duration_secs: f64) {
    TRAINING_RUNS_TOTAL.with_label_values(&[outcome]).inc();
    TRAINING_DURATION_SECONDS.observe(duration_secs);
}

pub fn record_prediction(risk_level: &str) {
    PREDICTIONS_TOTAL.with_label_values(&[risk_level]).inc();
}

pub fn record_ingested(created: usize, rejected: usize) {
    INGESTED_ROWS_TOTAL
        .with_label_values(&["created"])
        .inc_by(created as f64);
    INGESTED_ROWS_TOTAL
        .with_label_values(&["rejected"])
        .inc_by(rejected as f64);
}

/// Prometheus text format of every registered metric
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

/// Axum middleware recording request count and latency per route template
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_pipeline_counters() {
        init_metrics().unwrap();
        record_prediction("Medio");
        record_training("success", 1.5);
        record_ingested(3, 1);

        assert!(PREDICTIONS_TOTAL.with_label_values(&["Medio"]).get() >= 1.0);
        assert!(INGESTED_ROWS_TOTAL.with_label_values(&["rejected"]).get() >= 1.0);

        let text = gather_metrics();
        assert!(text.contains("accident_risk_training_runs_total"));
        assert!(text.contains("accident_risk_predictions_total"));
    }

    #[tokio::test]
    async fn test_middleware_uses_route_template() {
        init_metrics().unwrap();
        let app = Router::new()
            .route("/items/:id", get(|| async { "ok" }))
            .layer(middleware::from_fn(track_metrics));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/items/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let count = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/items/:id", "200"])
            .get();
        assert!(count >= 1.0);
    }
}
